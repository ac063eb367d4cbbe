//! Symmetric encryption for stored credentials.
//!
//! Uses AES-256-GCM with a key generated once and persisted next to the
//! vault database with owner-only permissions. Ciphertexts are
//! `base64(nonce || ciphertext)`. Losing the key file makes every stored
//! secret permanently unrecoverable; there is no recovery path.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::RngCore;
use std::path::Path;
use thiserror::Error;

/// Key length in bytes (256 bits for AES-256)
const KEY_LENGTH: usize = 32;

/// Nonce length in bytes (96 bits for AES-GCM)
const NONCE_LENGTH: usize = 12;

#[derive(Debug, Error)]
pub enum CipherError {
    #[error("Failed to access key file: {0}")]
    KeyFile(#[from] std::io::Error),

    #[error("Key file is malformed")]
    KeyFormat,

    #[error("Credential ciphertext is corrupt or was written with a different key")]
    Corrupt,
}

/// A vault-lifetime cipher bound to one persisted key.
#[derive(Clone)]
pub struct Cipher {
    key: [u8; KEY_LENGTH],
}

impl Cipher {
    /// Load the key from `key_path`, generating and persisting a new one
    /// (owner-only permissions) if the file does not exist.
    pub fn load_or_create(key_path: &Path) -> Result<Self, CipherError> {
        if key_path.exists() {
            let contents = std::fs::read_to_string(key_path)?;
            let bytes = hex::decode(contents.trim()).map_err(|_| CipherError::KeyFormat)?;
            let key: [u8; KEY_LENGTH] = bytes.try_into().map_err(|_| CipherError::KeyFormat)?;
            return Ok(Self { key });
        }

        if let Some(parent) = key_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut key = [0u8; KEY_LENGTH];
        rand::thread_rng().fill_bytes(&mut key);
        std::fs::write(key_path, hex::encode(key))?;
        restrict_permissions(key_path)?;

        tracing::info!(path = %key_path.display(), "Generated new vault encryption key");
        Ok(Self { key })
    }

    /// Construct from raw key bytes (test fixtures).
    #[cfg(test)]
    pub fn from_key(key: [u8; KEY_LENGTH]) -> Self {
        Self { key }
    }

    /// Encrypt a plaintext secret. Empty input stays empty so "no
    /// credential stored" round-trips as the empty string.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, CipherError> {
        if plaintext.is_empty() {
            return Ok(String::new());
        }

        let mut nonce_bytes = [0u8; NONCE_LENGTH];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);

        let cipher = Aes256Gcm::new_from_slice(&self.key).map_err(|_| CipherError::KeyFormat)?;
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| CipherError::Corrupt)?;

        let mut combined = Vec::with_capacity(NONCE_LENGTH + ciphertext.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&ciphertext);

        Ok(BASE64.encode(&combined))
    }

    /// Decrypt a stored ciphertext. Empty input stays empty. Any decode
    /// or authentication failure maps to [`CipherError::Corrupt`];
    /// callers treat that as "no credential available".
    pub fn decrypt(&self, ciphertext: &str) -> Result<String, CipherError> {
        if ciphertext.is_empty() {
            return Ok(String::new());
        }

        let combined = BASE64.decode(ciphertext).map_err(|_| CipherError::Corrupt)?;
        if combined.len() < NONCE_LENGTH {
            return Err(CipherError::Corrupt);
        }

        let (nonce_bytes, payload) = combined.split_at(NONCE_LENGTH);
        let cipher = Aes256Gcm::new_from_slice(&self.key).map_err(|_| CipherError::KeyFormat)?;
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = cipher
            .decrypt(nonce, payload)
            .map_err(|_| CipherError::Corrupt)?;

        String::from_utf8(plaintext).map_err(|_| CipherError::Corrupt)
    }
}

/// Restrict a file to owner read/write.
pub fn restrict_permissions(path: &Path) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}
