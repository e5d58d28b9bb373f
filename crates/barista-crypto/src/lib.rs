//! Barista installation-identity and request-signing library.
//!
//! Implements the vendor cloud's proprietary proof scheme:
//!
//! - **Identity**: P-256 (SECP256R1) keypair per installation, DER-encoded,
//!   plus a 32-byte secret derived from the id and the public key
//! - **Proof**: keyed position-dependent byte scramble + SHA-256
//! - **Signature**: ECDSA-SHA256 over `id.nonce.timestamp.proof`

pub mod error;
pub mod identity;
pub mod signing;

pub use error::CryptoError;
pub use identity::{InstallationKey, derive_secret};
pub use signing::{
    HEADER_INSTALLATION_ID, HEADER_NONCE, HEADER_PROOF, HEADER_SIGNATURE, HEADER_TIMESTAMP,
    SignedHeaders, base_string, request_proof, signed_headers,
};
