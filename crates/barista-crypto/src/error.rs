//! Crypto error types.

/// Errors from identity and signing operations.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    #[error("Key parsing failed: {0}")]
    KeyParse(String),

    #[error("ECDSA signing failed: {0}")]
    Signing(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
