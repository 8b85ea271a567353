//! Descriptor encryption at rest.
//!
//! Biometric templates are sealed with AES-256-GCM before they touch
//! the database file; a stolen database without the key file yields no
//! usable descriptors. Blob layout: 12-byte nonce || ciphertext+tag.

use std::path::Path;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;

use crate::error::{Error, Result};

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

/// AES-256-GCM cipher for descriptor blobs.
pub struct DescriptorCipher {
    cipher: Aes256Gcm,
}

impl DescriptorCipher {
    pub fn from_key_bytes(key: &[u8; KEY_LEN]) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key)),
        }
    }

    /// Cipher with a random key that lives only as long as the process.
    /// Used by in-memory stores in tests.
    pub fn ephemeral() -> Self {
        let mut key = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut key);
        Self::from_key_bytes(&key)
    }

    /// Load the key from `path`, generating and persisting a fresh one
    /// (mode 0600) on first run.
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            let bytes = std::fs::read(path)?;
            let key: [u8; KEY_LEN] = bytes.as_slice().try_into().map_err(|_| {
                Error::Crypto(format!(
                    "key file {} must hold exactly {KEY_LEN} bytes, found {}",
                    path.display(),
                    bytes.len()
                ))
            })?;
            return Ok(Self::from_key_bytes(&key));
        }

        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }

        let mut key = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut key);
        std::fs::write(path, key)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::info!(path = %path.display(), "generated new descriptor key file");
        Ok(Self::from_key_bytes(&key))
    }

    /// Encrypt `plaintext` under a fresh random nonce.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| Error::Crypto("descriptor encryption failed".into()))?;

        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&ciphertext);
        Ok(blob)
    }

    /// Decrypt a blob produced by [`seal`](Self::seal).
    pub fn open(&self, blob: &[u8]) -> Result<Vec<u8>> {
        if blob.len() <= NONCE_LEN {
            return Err(Error::Crypto("descriptor blob too short".into()));
        }
        let (nonce, ciphertext) = blob.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| Error::Crypto("descriptor decryption failed; wrong key?".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_open_round_trip() {
        let cipher = DescriptorCipher::ephemeral();
        let blob = cipher.seal(b"descriptor bytes").unwrap();
        assert_eq!(cipher.open(&blob).unwrap(), b"descriptor bytes");
    }

    #[test]
    fn test_nonces_differ_between_seals() {
        let cipher = DescriptorCipher::ephemeral();
        let a = cipher.seal(b"same").unwrap();
        let b = cipher.seal(b"same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_wrong_key_fails_closed() {
        let blob = DescriptorCipher::ephemeral().seal(b"secret").unwrap();
        let other = DescriptorCipher::ephemeral();
        assert!(other.open(&blob).is_err());
    }

    #[test]
    fn test_truncated_blob_rejected() {
        let cipher = DescriptorCipher::ephemeral();
        assert!(cipher.open(&[0u8; 5]).is_err());
    }

    #[test]
    fn test_key_file_round_trip() {
        let dir = std::env::temp_dir().join(format!("rollcall-key-{}", std::process::id()));
        let path = dir.join("descriptor.key");

        let first = DescriptorCipher::load_or_create(&path).unwrap();
        let blob = first.seal(b"persisted").unwrap();

        let second = DescriptorCipher::load_or_create(&path).unwrap();
        assert_eq!(second.open(&blob).unwrap(), b"persisted");

        std::fs::remove_dir_all(&dir).ok();
    }
}
