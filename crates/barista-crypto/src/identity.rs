//! Installation identity management.
//!
//! Each appliance installation has a long-lived P-256 (SECP256R1) keypair
//! plus a 32-byte secret derived from the installation id and the public
//! key. The vendor cloud authenticates the installation with ECDSA
//! signatures and a keyed request proof built from this material.

use std::path::Path;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use p256::SecretKey;
use p256::ecdsa::SigningKey;
use p256::pkcs8::EncodePublicKey;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use zeroize::Zeroize;

use crate::error::CryptoError;

/// Maximum length of the SEC1 DER private key for SECP256R1.
pub const MAX_PRIVATE_KEY_DER: usize = 121;
/// Length of the SPKI DER public key for SECP256R1.
pub const MAX_PUBLIC_KEY_DER: usize = 91;

/// The device-bound identity that authenticates this installation to the
/// vendor cloud, independent of user credentials.
///
/// Immutable after creation. Never leaves the device except as its public
/// components and signatures derived from them.
pub struct InstallationKey {
    installation_id: String,
    secret: [u8; 32],
    private_key_der: Vec<u8>,
    public_key_der: Vec<u8>,
}

impl Drop for InstallationKey {
    fn drop(&mut self) {
        self.secret.zeroize();
        self.private_key_der.zeroize();
    }
}

impl std::fmt::Debug for InstallationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstallationKey")
            .field("installation_id", &self.installation_id)
            .field("public_key_der", &hex::encode(&self.public_key_der))
            .field("secret", &"[REDACTED]")
            .field("private_key_der", &"[REDACTED]")
            .finish()
    }
}

impl InstallationKey {
    /// Generate a fresh identity for `installation_id`.
    ///
    /// Generates a P-256 keypair from OS entropy, exports both halves as
    /// DER, and derives the 32-byte installation secret.
    pub fn generate(installation_id: &str) -> Result<Self, CryptoError> {
        let secret_key = SecretKey::random(&mut OsRng);

        let private_key_der = secret_key
            .to_sec1_der()
            .map_err(|e| CryptoError::KeyGeneration(format!("private key DER export: {e}")))?
            .to_vec();

        let public_key_der = secret_key
            .public_key()
            .to_public_key_der()
            .map_err(|e| CryptoError::KeyGeneration(format!("public key DER export: {e}")))?
            .into_vec();

        let secret = derive_secret(installation_id, &public_key_der);

        Ok(Self {
            installation_id: installation_id.to_string(),
            secret,
            private_key_der,
            public_key_der,
        })
    }

    /// Reassemble an identity from persisted components.
    pub fn from_parts(
        installation_id: String,
        secret: [u8; 32],
        private_key_der: Vec<u8>,
        public_key_der: Vec<u8>,
    ) -> Self {
        Self {
            installation_id,
            secret,
            private_key_der,
            public_key_der,
        }
    }

    pub fn installation_id(&self) -> &str {
        &self.installation_id
    }

    /// The 32-byte derived secret keying the request proof.
    pub const fn secret(&self) -> &[u8; 32] {
        &self.secret
    }

    pub fn public_key_der(&self) -> &[u8] {
        &self.public_key_der
    }

    /// Parse the private key into an ECDSA signing key.
    pub fn signing_key(&self) -> Result<SigningKey, CryptoError> {
        let secret_key = SecretKey::from_sec1_der(&self.private_key_der)
            .map_err(|e| CryptoError::KeyParse(format!("private key DER: {e}")))?;
        Ok(SigningKey::from(secret_key))
    }

    /// Save the identity to `path` as JSON with restrictive permissions.
    pub fn save_to_file(&self, path: &Path) -> Result<(), CryptoError> {
        let dir = path.parent().ok_or_else(|| {
            CryptoError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "path has no parent directory",
            ))
        })?;
        std::fs::create_dir_all(dir)?;

        let record = IdentityRecord {
            installation_id: Some(self.installation_id.clone()),
            secret: Some(BASE64.encode(self.secret)),
            private_key: Some(BASE64.encode(&self.private_key_der)),
            public_key: Some(BASE64.encode(&self.public_key_der)),
        };
        let json = serde_json::to_string_pretty(&record)
            .map_err(|e| CryptoError::Serialization(e.to_string()))?;
        std::fs::write(path, json)?;

        // Set restrictive permissions on Unix
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        Ok(())
    }

    /// Load an identity from `path`.
    ///
    /// A record is valid only when the installation id, secret, and both
    /// keys are present and well-formed. A partial or corrupt record is
    /// treated as absent (`Ok(None)`) and is never auto-repaired; callers
    /// regenerate the identity and the secret together.
    pub fn load_from_file(path: &Path) -> Result<Option<Self>, CryptoError> {
        if !path.exists() {
            return Ok(None);
        }

        let json = std::fs::read_to_string(path)?;
        let record: IdentityRecord = match serde_json::from_str(&json) {
            Ok(record) => record,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Corrupt identity record, treating as absent");
                return Ok(None);
            }
        };

        match record.into_key() {
            Ok(key) => Ok(Some(key)),
            Err(reason) => {
                warn!(path = %path.display(), reason, "Partial identity record, treating as absent");
                Ok(None)
            }
        }
    }

    /// Load from file, or generate a fresh identity (new UUID) and save it.
    pub fn load_or_generate(path: &Path) -> Result<Self, CryptoError> {
        if let Some(key) = Self::load_from_file(path)? {
            return Ok(key);
        }
        let installation_id = uuid::Uuid::new_v4().to_string();
        let key = Self::generate(&installation_id)?;
        key.save_to_file(path)?;
        info!(installation_id = %key.installation_id, "Generated new installation identity");
        Ok(key)
    }
}

/// Derive the 32-byte installation secret:
/// `SHA256(id + "." + base64(public_key_der) + "." + base64(SHA256(id)))`.
///
/// Binds the secret to both the installation id and the keypair; changing
/// either invalidates it deterministically.
pub fn derive_secret(installation_id: &str, public_key_der: &[u8]) -> [u8; 32] {
    let id_hash = Sha256::digest(installation_id.as_bytes());
    let triple = format!(
        "{}.{}.{}",
        installation_id,
        BASE64.encode(public_key_der),
        BASE64.encode(id_hash)
    );
    Sha256::digest(triple.as_bytes()).into()
}

/// On-disk identity record. All four fields must be present together; a
/// missing field invalidates the whole record.
#[derive(Serialize, Deserialize)]
struct IdentityRecord {
    #[serde(default)]
    installation_id: Option<String>,
    #[serde(default)]
    secret: Option<String>,
    #[serde(default)]
    private_key: Option<String>,
    #[serde(default)]
    public_key: Option<String>,
}

impl IdentityRecord {
    fn into_key(self) -> Result<InstallationKey, &'static str> {
        let installation_id = self
            .installation_id
            .filter(|id| !id.is_empty())
            .ok_or("missing installation id")?;
        let secret_b64 = self.secret.ok_or("missing secret")?;
        let private_b64 = self.private_key.ok_or("missing private key")?;
        let public_b64 = self.public_key.ok_or("missing public key")?;

        let secret_bytes = BASE64.decode(secret_b64).map_err(|_| "undecodable secret")?;
        let secret: [u8; 32] = secret_bytes
            .try_into()
            .map_err(|_| "secret is not 32 bytes")?;

        let private_key_der = BASE64
            .decode(private_b64)
            .map_err(|_| "undecodable private key")?;
        if private_key_der.is_empty() || private_key_der.len() > MAX_PRIVATE_KEY_DER {
            return Err("private key length out of range");
        }

        let public_key_der = BASE64
            .decode(public_b64)
            .map_err(|_| "undecodable public key")?;
        if public_key_der.is_empty() || public_key_der.len() > MAX_PUBLIC_KEY_DER {
            return Err("public key length out of range");
        }

        Ok(InstallationKey::from_parts(
            installation_id,
            secret,
            private_key_der,
            public_key_der,
        ))
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    fn test_key_path(dir: &tempfile::TempDir) -> std::path::PathBuf {
        dir.path().join("identity.json")
    }

    #[test]
    fn generated_key_has_bounded_der_lengths() {
        let key = InstallationKey::generate("11111111-2222-3333-4444-555555555555").unwrap();
        assert!(key.private_key_der.len() <= MAX_PRIVATE_KEY_DER);
        assert!(key.private_key_der.len() > 30);
        assert_eq!(key.public_key_der.len(), MAX_PUBLIC_KEY_DER);
    }

    #[test]
    fn generated_secret_matches_derivation() {
        let key = InstallationKey::generate("test-install").unwrap();
        assert_eq!(
            key.secret,
            derive_secret("test-install", &key.public_key_der)
        );
    }

    #[test]
    fn derive_secret_golden_value() {
        // Frozen regression vector: any change to the derivation breaks
        // compatibility with the vendor cloud.
        let mut public_key_der = vec![
            0x30, 0x59, 0x30, 0x13, 0x06, 0x07, 0x2A, 0x86, 0x48, 0xCE, 0x3D, 0x02, 0x01, 0x06,
            0x08, 0x2A, 0x86, 0x48, 0xCE, 0x3D, 0x03, 0x01, 0x07, 0x03, 0x42, 0x00, 0x04,
        ];
        public_key_der.extend(1..=64u8);
        assert_eq!(public_key_der.len(), 91);

        let secret = derive_secret("abc-123", &public_key_der);
        assert_eq!(
            hex::encode(secret),
            "9c47c56aabf7597f73a7b6ac3392a495c43dbe998e00dde350465671a73deaa8"
        );
    }

    #[test]
    fn derive_secret_changes_with_either_input() {
        let key = InstallationKey::generate("id-a").unwrap();
        let base = derive_secret("id-a", &key.public_key_der);
        assert_ne!(base, derive_secret("id-b", &key.public_key_der));

        let other = InstallationKey::generate("id-a").unwrap();
        assert_ne!(base, derive_secret("id-a", &other.public_key_der));
    }

    #[test]
    fn signing_key_parses_from_generated_der() {
        let key = InstallationKey::generate("sign-test").unwrap();
        assert!(key.signing_key().is_ok());
    }

    #[test]
    fn save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = test_key_path(&dir);

        let key = InstallationKey::generate("roundtrip").unwrap();
        key.save_to_file(&path).unwrap();

        let loaded = InstallationKey::load_from_file(&path).unwrap().unwrap();
        assert_eq!(loaded.installation_id, key.installation_id);
        assert_eq!(loaded.secret, key.secret);
        assert_eq!(loaded.private_key_der, key.private_key_der);
        assert_eq!(loaded.public_key_der, key.public_key_der);
    }

    #[test]
    fn load_missing_file_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = InstallationKey::load_from_file(&test_key_path(&dir)).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn partial_record_is_treated_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = test_key_path(&dir);

        let key = InstallationKey::generate("partial").unwrap();
        std::fs::write(
            &path,
            serde_json::json!({
                "installation_id": key.installation_id,
                "secret": BASE64.encode(key.secret),
                // private_key and public_key missing
            })
            .to_string(),
        )
        .unwrap();

        assert!(InstallationKey::load_from_file(&path).unwrap().is_none());
    }

    #[test]
    fn corrupt_record_is_treated_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = test_key_path(&dir);
        std::fs::write(&path, "not json at all").unwrap();
        assert!(InstallationKey::load_from_file(&path).unwrap().is_none());
    }

    #[test]
    fn record_with_short_secret_is_treated_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = test_key_path(&dir);

        let key = InstallationKey::generate("short-secret").unwrap();
        std::fs::write(
            &path,
            serde_json::json!({
                "installation_id": key.installation_id,
                "secret": BASE64.encode([0u8; 16]),
                "private_key": BASE64.encode(&key.private_key_der),
                "public_key": BASE64.encode(&key.public_key_der),
            })
            .to_string(),
        )
        .unwrap();

        assert!(InstallationKey::load_from_file(&path).unwrap().is_none());
    }

    #[test]
    fn load_or_generate_creates_then_reuses() {
        let dir = tempfile::tempdir().unwrap();
        let path = test_key_path(&dir);

        let first = InstallationKey::load_or_generate(&path).unwrap();
        assert!(path.exists());

        let second = InstallationKey::load_or_generate(&path).unwrap();
        assert_eq!(first.installation_id, second.installation_id);
        assert_eq!(first.public_key_der, second.public_key_der);
    }

    #[cfg(unix)]
    #[test]
    fn saved_record_has_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = test_key_path(&dir);
        InstallationKey::generate("perms")
            .unwrap()
            .save_to_file(&path)
            .unwrap();

        let perms = std::fs::metadata(&path).unwrap().permissions();
        assert_eq!(perms.mode() & 0o777, 0o600);
    }

    #[test]
    fn debug_impl_redacts_private_material() {
        let key = InstallationKey::generate("debug-test").unwrap();
        let output = format!("{key:?}");
        assert!(output.contains("[REDACTED]"));
        assert!(!output.contains(&hex::encode(key.secret)));
        assert!(!output.contains(&hex::encode(&key.private_key_der)));
    }
}
