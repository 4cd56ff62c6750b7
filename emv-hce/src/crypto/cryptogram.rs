//! Application Cryptogram (ARQC) generation
//!
//! AC = first 8 bytes of HMAC-SHA256(session_key, ATC(2) || amount(6) || terminal_data)

use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::Zeroizing;

use super::CryptoError;

type HmacSha256 = Hmac<Sha256>;

/// Length of the Application Cryptogram in bytes
pub const CRYPTOGRAM_LEN: usize = 8;

/// Width of the amount field in the MAC input and in the CDOL data
pub const AMOUNT_LEN: usize = 6;

/// Compute the 8-byte Application Cryptogram
///
/// `amount` is written as 6 bytes big-endian; the top two bytes of the
/// `u64` are not part of the message.
pub fn generate(
    session_key_hex: &str,
    atc: u16,
    amount: u64,
    terminal_data: &[u8],
) -> Result<[u8; CRYPTOGRAM_LEN], CryptoError> {
    let key = Zeroizing::new(hex::decode(session_key_hex)?);

    let mut mac = HmacSha256::new_from_slice(&key[..])
        .map_err(|e| CryptoError::KeyFormat(e.to_string()))?;
    mac.update(&atc.to_be_bytes());
    mac.update(&amount.to_be_bytes()[8 - AMOUNT_LEN..]);
    mac.update(terminal_data);

    let digest = mac.finalize().into_bytes();
    let mut ac = [0u8; CRYPTOGRAM_LEN];
    ac.copy_from_slice(&digest[..CRYPTOGRAM_LEN]);
    Ok(ac)
}

/// Read the amount from the first 6 bytes of GENERATE AC data (zero if short)
pub fn amount_from_cdol(data: &[u8]) -> u64 {
    match data.get(..AMOUNT_LEN) {
        Some(bytes) => bytes.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64),
        None => 0,
    }
}
