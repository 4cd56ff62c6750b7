//! At-rest encryption for token fields
//!
//! AES-256-GCM under a server key. Blob = base64(nonce(12) || ciphertext || tag).

use std::fmt;

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, Key, KeyInit, Nonce};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::{Zeroize, Zeroizing};

use super::CryptoError;

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

/// Field cipher for DPANs and session keys held by the token store
#[derive(Clone)]
pub struct AtRestCipher {
    cipher: Aes256Gcm,
}

impl AtRestCipher {
    /// Build from a 32-byte key
    pub fn new(key: &[u8]) -> Result<Self, CryptoError> {
        if key.len() != KEY_LEN {
            return Err(CryptoError::KeyFormat(format!(
                "at-rest key must be {} bytes, got {}",
                KEY_LEN,
                key.len()
            )));
        }
        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|e| CryptoError::KeyFormat(e.to_string()))?;
        Ok(Self { cipher })
    }

    /// Build from a 64-character hex key
    pub fn from_hex(key_hex: &str) -> Result<Self, CryptoError> {
        let key = Zeroizing::new(hex::decode(key_hex.trim())?);
        Self::new(&key[..])
    }

    /// Build with a random key (development and tests; data does not survive a restart)
    pub fn ephemeral() -> Self {
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        OsRng.fill_bytes(&mut key[..]);
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key[..])),
        }
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<String, CryptoError> {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|e| CryptoError::Encryption(e.to_string()))?;

        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(blob))
    }

    pub fn decrypt(&self, encoded: &str) -> Result<Vec<u8>, CryptoError> {
        let blob = STANDARD
            .decode(encoded)
            .map_err(|e| CryptoError::MalformedEnvelope(e.to_string()))?;
        if blob.len() < NONCE_LEN {
            return Err(CryptoError::MalformedEnvelope("missing nonce".to_string()));
        }
        let (nonce, ciphertext) = blob.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CryptoError::Decryption)
    }

    pub fn encrypt_str(&self, plaintext: &str) -> Result<String, CryptoError> {
        self.encrypt(plaintext.as_bytes())
    }

    pub fn decrypt_string(&self, encoded: &str) -> Result<String, CryptoError> {
        let bytes = self.decrypt(encoded)?;
        String::from_utf8(bytes).map_err(|e| {
            e.into_bytes().zeroize();
            CryptoError::Decryption
        })
    }
}

impl fmt::Debug for AtRestCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AtRestCipher(..)")
    }
}
