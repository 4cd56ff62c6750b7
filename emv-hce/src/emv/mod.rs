//! EMV contactless card emulation
//!
//! The responder answers a terminal's tap (SELECT PPSE, SELECT AID, GPO,
//! READ RECORD, GENERATE AC) from the credential in the active token slot.

pub mod aid;
pub mod responder;
pub mod slot;
pub mod templates;

pub use aid::{Scheme, SelectTarget, AID_MASTERCARD, AID_VISA, PPSE};
pub use responder::{DeactivationReason, PaymentResponder, TapState};
pub use slot::{mask_pan, ActiveTokenSlot, PaymentPayload};

use thiserror::Error;

use crate::apdu::{APDUError, SW};
use crate::crypto::CryptoError;

/// Why a tap command could not be answered normally
///
/// Never leaves the responder: every variant becomes a status word.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TapError {
    #[error("Malformed command: {0}")]
    Protocol(#[from] APDUError),

    #[error("Unknown instruction 0x{0:02X}")]
    UnknownInstruction(u8),

    #[error("SELECT of unsupported application")]
    UnknownApplication,

    #[error("No credential in the active token slot")]
    NoCredential,

    #[error("Credential expired, refresh required")]
    CredentialExpired,

    #[error("Credential unusable: {0}")]
    InvalidCredential(String),

    #[error("Cryptogram failed: {0}")]
    Crypto(#[from] CryptoError),
}

impl TapError {
    /// Status word sent to the terminal for this failure
    pub fn status_word(&self) -> u16 {
        match self {
            TapError::Protocol(e) => e.status_word(),
            TapError::UnknownInstruction(_) | TapError::UnknownApplication => SW::FILE_NOT_FOUND,
            TapError::NoCredential | TapError::CredentialExpired => SW::CONDITIONS_NOT_SATISFIED,
            TapError::InvalidCredential(_) | TapError::Crypto(_) => SW::UNKNOWN_ERROR,
        }
    }
}
