//! Error types shared across the Barista session layer.

use thiserror::Error;

/// Result type alias using the Barista [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy for the session layer.
///
/// Recovery semantics, per operation site:
/// - [`Error::NotProvisioned`] is fatal until an identity is provisioned.
/// - [`Error::Crypto`] is fatal for the affected operation; signing is
///   never silently skipped.
/// - [`Error::Http`] is recoverable: auth endpoints fall back to a full
///   sign-in, commands surface it to the caller.
/// - [`Error::Json`] drops the malformed message and keeps the prior
///   snapshot.
/// - [`Error::StompFrame`] drops the frame without disconnecting.
/// - [`Error::Transport`] marks the connection down and leaves recovery to
///   the reconnect throttle.
#[derive(Debug, Error)]
pub enum Error {
    /// No installation identity exists yet; provision before connecting.
    #[error("Installation identity not provisioned")]
    NotProvisioned,

    /// Identity or signing failure.
    #[error("Crypto error: {0}")]
    Crypto(#[from] barista_crypto::CryptoError),

    /// Non-2xx response from the vendor cloud.
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// Malformed JSON payload.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Unparsable STOMP frame.
    #[error("STOMP frame error: {0}")]
    StompFrame(String),

    /// Socket-level failure on the telemetry channel.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
