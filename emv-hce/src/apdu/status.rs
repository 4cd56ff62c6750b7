//! Status Word (SW) constants for APDU responses
//!
//! Every response the contactless responder produces ends with exactly one
//! of these two-byte trailers.

/// Status Word constants
pub struct SW;

impl SW {
    /// Normal processing
    pub const SUCCESS: u16 = 0x9000;

    /// Lc/Le inconsistent with the command
    pub const WRONG_LENGTH: u16 = 0x6700;

    /// Command needs a tap-ready credential and none is loaded
    pub const CONDITIONS_NOT_SATISFIED: u16 = 0x6985;

    /// AID or instruction not handled by this card
    pub const FILE_NOT_FOUND: u16 = 0x6A82;

    /// No precise diagnosis (also used for truncated commands)
    pub const UNKNOWN_ERROR: u16 = 0x6F00;

    /// All status words the responder can emit
    pub const ALL: [u16; 5] = [
        Self::SUCCESS,
        Self::WRONG_LENGTH,
        Self::CONDITIONS_NOT_SATISFIED,
        Self::FILE_NOT_FOUND,
        Self::UNKNOWN_ERROR,
    ];

    /// Split a status word into its SW1/SW2 wire bytes
    #[inline]
    pub fn to_bytes(sw: u16) -> [u8; 2] {
        sw.to_be_bytes()
    }

    /// Read the trailing status word from a raw response
    #[inline]
    pub fn trailer(response: &[u8]) -> Option<u16> {
        match response {
            [.., sw1, sw2] => Some(((*sw1 as u16) << 8) | (*sw2 as u16)),
            _ => None,
        }
    }

    /// Check if a status word indicates success
    #[inline]
    pub fn is_success(sw: u16) -> bool {
        sw == Self::SUCCESS
    }

    /// Short label for logs
    pub fn name(sw: u16) -> &'static str {
        match sw {
            Self::SUCCESS => "OK",
            Self::WRONG_LENGTH => "WRONG_LENGTH",
            Self::CONDITIONS_NOT_SATISFIED => "CONDITIONS_NOT_SATISFIED",
            Self::FILE_NOT_FOUND => "NOT_FOUND",
            Self::UNKNOWN_ERROR => "UNKNOWN",
            _ => "UNRECOGNIZED",
        }
    }
}
