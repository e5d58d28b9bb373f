//! Vendor request-signing scheme.
//!
//! Every authenticated call carries four headers: the installation id, a
//! millisecond timestamp, a UUIDv4 nonce, and an ECDSA signature over the
//! three plus a keyed "request proof". The proof is a position-dependent
//! byte scramble keyed by the installation secret, not a standard MAC; it
//! must be reproduced byte-for-byte for the cloud to accept the request.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use p256::ecdsa::Signature;
use p256::ecdsa::signature::Signer;
use sha2::{Digest, Sha256};

use crate::error::CryptoError;
use crate::identity::InstallationKey;

/// Header carrying the installation id.
pub const HEADER_INSTALLATION_ID: &str = "X-App-Installation-Id";
/// Header carrying the millisecond timestamp.
pub const HEADER_TIMESTAMP: &str = "X-Timestamp";
/// Header carrying the UUIDv4 nonce.
pub const HEADER_NONCE: &str = "X-Nonce";
/// Header carrying the ECDSA request signature.
pub const HEADER_SIGNATURE: &str = "X-Request-Signature";
/// Header carrying the registration proof (one-time `/auth/init` only).
pub const HEADER_PROOF: &str = "X-Request-Proof";

/// The four signed request headers attached to every authenticated call.
#[derive(Debug, Clone)]
pub struct SignedHeaders {
    pub installation_id: String,
    pub timestamp: String,
    pub nonce: String,
    pub signature: String,
}

/// Compute the keyed request proof over `base_string`.
///
/// A 32-byte work buffer starts as the installation secret. Each input
/// byte `b` updates one slot: `idx = b % 32`, the rotation amount is the
/// low three bits of the *next* slot, and
/// `work[idx] = (b ^ work[idx]).rotate_left(shift)`. The proof is the
/// base64 of SHA-256 over the final buffer. Order-dependent by design.
pub fn request_proof(secret: &[u8; 32], base_string: &str) -> String {
    let mut work = *secret;

    for &b in base_string.as_bytes() {
        let idx = usize::from(b) % 32;
        let shift = u32::from(work[(idx + 1) % 32] & 7);
        work[idx] = (b ^ work[idx]).rotate_left(shift);
    }

    BASE64.encode(Sha256::digest(work))
}

/// The registration base string:
/// `installation_id + "." + base64(SHA256(public_key_der))`.
///
/// Used only by the one-time `/auth/init` registration call.
pub fn base_string(key: &InstallationKey) -> String {
    let pub_hash = Sha256::digest(key.public_key_der());
    format!("{}.{}", key.installation_id(), BASE64.encode(pub_hash))
}

/// Build the signed headers for one request.
///
/// `proof = request_proof(secret, id + "." + nonce + "." + timestamp)` and
/// the signature is DER-encoded ECDSA-SHA256 over
/// `id + "." + nonce + "." + timestamp + "." + proof`.
///
/// A [`CryptoError`] here is non-retriable without regenerating the
/// identity; callers must not silently skip signing.
pub fn signed_headers(key: &InstallationKey) -> Result<SignedHeaders, CryptoError> {
    let nonce = uuid::Uuid::new_v4().to_string();
    let timestamp = unix_millis().to_string();
    sign_request(key, &nonce, &timestamp)
}

/// Deterministic core of [`signed_headers`], split out for testing.
fn sign_request(
    key: &InstallationKey,
    nonce: &str,
    timestamp: &str,
) -> Result<SignedHeaders, CryptoError> {
    let payload = format!("{}.{}.{}", key.installation_id(), nonce, timestamp);
    let proof = request_proof(key.secret(), &payload);
    let message = format!("{payload}.{proof}");

    let signing_key = key.signing_key()?;
    let signature: Signature = signing_key
        .try_sign(message.as_bytes())
        .map_err(|e| CryptoError::Signing(e.to_string()))?;

    Ok(SignedHeaders {
        installation_id: key.installation_id().to_string(),
        timestamp: timestamp.to_string(),
        nonce: nonce.to_string(),
        signature: BASE64.encode(signature.to_der().as_bytes()),
    })
}

/// Wall-clock milliseconds since the Unix epoch.
fn unix_millis() -> u128 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| d.as_millis())
}
