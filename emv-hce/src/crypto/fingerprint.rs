//! Device Fingerprint Calculation
//!
//! One-way SHA-256 binding of a token to a device. The raw identifiers
//! cannot be recovered from the fingerprint.

use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 of a UTF-8 string
pub fn sha256_hex(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

/// Fingerprint from hardware identifiers: SHA-256(`android_id|manufacturer|model`)
///
/// A missing Android ID hashes as `unknown`.
pub fn device_fingerprint(android_id: Option<&str>, manufacturer: &str, model: &str) -> String {
    let raw = format!("{}|{}|{}", android_id.unwrap_or("unknown"), manufacturer, model);
    sha256_hex(&raw)
}

/// Fingerprint from a random installation id, used when the user has not
/// consented to hardware identifiers. Changes on reinstall.
pub fn installation_fingerprint(install_id: &str) -> String {
    sha256_hex(install_id)
}
