//! Cryptographic Operations
//!
//! Cryptogram generation for taps, envelope encryption for delivering
//! credentials to a device, at-rest encryption of token fields, and device
//! fingerprint hashing.

pub mod at_rest;
pub mod cryptogram;
pub mod envelope;
pub mod fingerprint;

pub use self::at_rest::AtRestCipher;
pub use self::cryptogram::{amount_from_cdol, generate as generate_cryptogram, CRYPTOGRAM_LEN};
pub use self::envelope::{load_public_key, open, seal, seal_for, validate_public_key};
pub use self::fingerprint::{device_fingerprint, installation_fingerprint, sha256_hex};

use thiserror::Error;

/// Errors from the crypto layer
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Hex decode failed: {0}")]
    Decode(String),

    #[error("Invalid key: {0}")]
    KeyFormat(String),

    #[error("Decryption failed")]
    Decryption,

    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),
}

impl From<hex::FromHexError> for CryptoError {
    fn from(e: hex::FromHexError) -> Self {
        CryptoError::Decode(e.to_string())
    }
}
