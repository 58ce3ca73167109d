//! AES-256-GCM encryption for stored OAuth tokens
//!
//! Stored form is hex of `nonce (12) || tag (16) || ciphertext`, with a fresh
//! random nonce for every encryption.

use aes_gcm::aead::{AeadCore, AeadInPlace, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce, Tag};
use secrecy::SecretString;
use thiserror::Error;

const NONCE_SIZE: usize = 12;
const TAG_SIZE: usize = 16;
const KEY_SIZE: usize = 32;

/// Cipher errors
#[derive(Error, Debug)]
pub enum CipherError {
    #[error("invalid token key: {0}")]
    InvalidKey(String),

    #[error("token encryption failed")]
    Encrypt,

    #[error("token decryption failed: {0}")]
    Decrypt(String),
}

/// Symmetric authenticated cipher for tokens at rest
#[derive(Clone)]
pub struct TokenCipher {
    cipher: Aes256Gcm,
}

impl TokenCipher {
    /// Create from a 64-character hex key
    pub fn from_hex_key(key_hex: &str) -> Result<Self, CipherError> {
        let key = hex::decode(key_hex.trim())
            .map_err(|e| CipherError::InvalidKey(format!("not hex: {}", e)))?;
        if key.len() != KEY_SIZE {
            return Err(CipherError::InvalidKey(format!(
                "expected {} bytes, got {}",
                KEY_SIZE,
                key.len()
            )));
        }

        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| CipherError::InvalidKey(e.to_string()))?;
        Ok(Self { cipher })
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, CipherError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let mut buffer = plaintext.as_bytes().to_vec();
        let tag = self
            .cipher
            .encrypt_in_place_detached(&nonce, b"", &mut buffer)
            .map_err(|_| CipherError::Encrypt)?;

        let mut combined = Vec::with_capacity(NONCE_SIZE + TAG_SIZE + buffer.len());
        combined.extend_from_slice(&nonce);
        combined.extend_from_slice(&tag);
        combined.extend_from_slice(&buffer);
        Ok(hex::encode(combined))
    }

    pub fn decrypt(&self, stored: &str) -> Result<SecretString, CipherError> {
        let combined =
            hex::decode(stored.trim()).map_err(|e| CipherError::Decrypt(format!("not hex: {}", e)))?;
        if combined.len() < NONCE_SIZE + TAG_SIZE {
            return Err(CipherError::Decrypt("ciphertext too short".to_string()));
        }

        let (nonce, rest) = combined.split_at(NONCE_SIZE);
        let (tag, ciphertext) = rest.split_at(TAG_SIZE);
        let mut buffer = ciphertext.to_vec();
        self.cipher
            .decrypt_in_place_detached(Nonce::from_slice(nonce), b"", &mut buffer, Tag::from_slice(tag))
            .map_err(|_| CipherError::Decrypt("authentication failed".to_string()))?;

        let plaintext = String::from_utf8(buffer)
            .map_err(|_| CipherError::Decrypt("plaintext is not UTF-8".to_string()))?;
        Ok(SecretString::from(plaintext))
    }
}
