//! APDU (Application Protocol Data Unit) handling
//!
//! Plain structs and functions for the ISO 7816-4 command APDUs a contactless
//! POS terminal sends during an EMV tap, and the responses we send back.
//!
//! # Example
//! ```ignore
//! use emv_hce::apdu::{parse_apdu, Response};
//!
//! // SELECT PPSE as sent by a terminal
//! let raw = hex::decode("00A404000E325041592E5359532E444446303100").unwrap();
//! let apdu = parse_apdu(&raw).unwrap();
//! assert_eq!(apdu.ins, 0xA4);
//!
//! let response = Response::success(vec![0x6F, 0x00]);
//! assert!(response.is_okay());
//! ```

mod response;
mod status;

pub use response::Response;
pub use status::SW;

use thiserror::Error;

/// Errors that can occur during APDU parsing
#[derive(Debug, Error, PartialEq, Eq)]
pub enum APDUError {
    #[error("APDU too short: expected at least 4 bytes, got {0}")]
    TooShort(usize),

    #[error("Invalid APDU length")]
    InvalidLength,

    #[error("Invalid extended APDU format")]
    InvalidExtendedFormat,
}

impl APDUError {
    /// Status word a card answers with when it cannot parse the command
    pub fn status_word(&self) -> u16 {
        match self {
            APDUError::TooShort(_) => SW::UNKNOWN_ERROR,
            APDUError::InvalidLength | APDUError::InvalidExtendedFormat => SW::WRONG_LENGTH,
        }
    }
}

/// Command APDU as sent by the terminal
///
/// CLA is 0x00 for ISO commands (SELECT, READ RECORD) and 0x80 for the EMV
/// proprietary ones (GPO, GENERATE AC).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct APDU {
    pub cla: u8,
    pub ins: u8,
    pub p1: u8,
    pub p2: u8,
    pub data: Vec<u8>,
    /// Le, with 0 already expanded to 256 (short) or 65536 (extended)
    pub le: Option<u32>,
}

impl APDU {
    pub fn new(cla: u8, ins: u8, p1: u8, p2: u8) -> Self {
        Self::with_data(cla, ins, p1, p2, Vec::new())
    }

    pub fn with_data(cla: u8, ins: u8, p1: u8, p2: u8, data: Vec<u8>) -> Self {
        Self {
            cla,
            ins,
            p1,
            p2,
            data,
            le: None,
        }
    }

    pub fn expect(mut self, le: u32) -> Self {
        self.le = Some(le);
        self
    }

    pub fn p1p2(&self) -> u16 {
        u16::from_be_bytes([self.p1, self.p2])
    }

    /// Short-form wire bytes: CLA INS P1 P2 [Lc Data] [Le]
    ///
    /// Used for terminal simulations; the responder itself only parses.
    /// Short form caps the data at 255 bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        debug_assert!(
            self.data.len() <= 0xFF,
            "{} data bytes need the extended form",
            self.data.len()
        );
        let mut out = vec![self.cla, self.ins, self.p1, self.p2];
        if !self.data.is_empty() {
            out.push(self.data.len() as u8);
            out.extend_from_slice(&self.data);
        }
        if let Some(le) = self.le {
            out.push(if le >= 256 { 0x00 } else { le as u8 });
        }
        out
    }
}

/// Parse a command APDU, short or extended
///
/// - Short: CLA INS P1 P2 [Lc Data] [Le]
/// - Extended: CLA INS P1 P2 00 [Lc1 Lc2 Data] [Le1 Le2]
///
/// # Example
/// ```ignore
/// let raw = &[0x00, 0xB2, 0x01, 0x0C, 0x00];  // READ RECORD 1, SFI 1, Le=256
/// let apdu = parse_apdu(raw).unwrap();
/// assert_eq!(apdu.ins, 0xB2);
/// assert_eq!(apdu.le, Some(256));
/// ```
pub fn parse_apdu(data: &[u8]) -> Result<APDU, APDUError> {
    let (header, body) = match data {
        [cla, ins, p1, p2, body @ ..] => ([*cla, *ins, *p1, *p2], body),
        _ => return Err(APDUError::TooShort(data.len())),
    };
    let mut apdu = APDU::new(header[0], header[1], header[2], header[3]);

    let (command_data, le) = match body {
        [0x00, ext @ ..] if ext.len() >= 2 && is_extended(ext) => extended_body(ext)?,
        _ => short_body(body)?,
    };
    apdu.data = command_data.to_vec();
    apdu.le = le;
    Ok(apdu)
}

const NO_DATA: &[u8] = &[];

fn is_extended(ext: &[u8]) -> bool {
    let lc = u16::from_be_bytes([ext[0], ext[1]]) as usize;
    ext.len() == 2 || ext.len() == 2 + lc || ext.len() == 2 + lc + 2
}

fn short_le(byte: u8) -> u32 {
    if byte == 0 {
        256
    } else {
        byte as u32
    }
}

fn short_body(body: &[u8]) -> Result<(&[u8], Option<u32>), APDUError> {
    match body {
        [] => Ok((NO_DATA, None)),
        [le] => Ok((NO_DATA, Some(short_le(*le)))),
        [lc, rest @ ..] => {
            let lc = *lc as usize;
            if rest.len() == lc {
                Ok((rest, None))
            } else if rest.len() == lc + 1 {
                Ok((&rest[..lc], Some(short_le(rest[lc]))))
            } else {
                Err(APDUError::InvalidLength)
            }
        }
    }
}

fn extended_body(ext: &[u8]) -> Result<(&[u8], Option<u32>), APDUError> {
    let word = |hi: u8, lo: u8| u16::from_be_bytes([hi, lo]) as u32;
    let first = word(ext[0], ext[1]);
    if ext.len() == 2 {
        let le = if first == 0 { 65536 } else { first };
        return Ok((NO_DATA, Some(le)));
    }

    let lc = first as usize;
    let rest = &ext[2..];
    if rest.len() == lc {
        return Ok((rest, None));
    }
    if rest.len() == lc + 2 {
        let le = match word(rest[lc], rest[lc + 1]) {
            0 => 65536,
            n => n,
        };
        return Ok((&rest[..lc], Some(le)));
    }
    Err(APDUError::InvalidExtendedFormat)
}

/// EMV contactless instruction bytes
pub mod ins {
    pub const SELECT: u8 = 0xA4;
    pub const GET_PROCESSING_OPTIONS: u8 = 0xA8;
    pub const READ_RECORD: u8 = 0xB2;
    pub const GENERATE_AC: u8 = 0xAE;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case1_no_data_no_le() {
        let apdu = parse_apdu(&[0x00, 0xA4, 0x04, 0x00]).unwrap();
        assert_eq!(apdu.cla, 0x00);
        assert_eq!(apdu.ins, ins::SELECT);
        assert_eq!(apdu.p1, 0x04);
        assert!(apdu.data.is_empty());
        assert!(apdu.le.is_none());
    }

    #[test]
    fn test_read_record_le_only() {
        let apdu = parse_apdu(&[0x00, 0xB2, 0x01, 0x0C, 0x00]).unwrap();
        assert_eq!(apdu.ins, ins::READ_RECORD);
        assert!(apdu.data.is_empty());
        assert_eq!(apdu.le, Some(256));
    }

    #[test]
    fn test_select_ppse_with_le() {
        let raw = hex::decode("00A404000E325041592E5359532E444446303100").unwrap();
        let apdu = parse_apdu(&raw).unwrap();
        assert_eq!(apdu.ins, ins::SELECT);
        assert_eq!(apdu.data, b"2PAY.SYS.DDF01".to_vec());
        assert_eq!(apdu.le, Some(256));
    }

    #[test]
    fn test_gpo_lc_data() {
        let apdu = parse_apdu(&[0x80, 0xA8, 0x00, 0x00, 0x02, 0x83, 0x00]).unwrap();
        assert_eq!(apdu.ins, ins::GET_PROCESSING_OPTIONS);
        assert_eq!(apdu.data, vec![0x83, 0x00]);
        assert!(apdu.le.is_none());
    }

    #[test]
    fn test_to_bytes_matches_parse() {
        let cmd = APDU::with_data(0x80, ins::GENERATE_AC, 0x80, 0x00, vec![0, 0, 0, 0, 0x03, 0xE8]).expect(256);
        let raw = cmd.to_bytes();
        assert_eq!(raw, vec![0x80, 0xAE, 0x80, 0x00, 0x06, 0, 0, 0, 0, 0x03, 0xE8, 0x00]);
        assert_eq!(parse_apdu(&raw).unwrap(), cmd);
    }

    #[test]
    fn test_to_bytes_longest_short_form() {
        let cmd = APDU::with_data(0x00, ins::SELECT, 0x04, 0x00, vec![0x5A; 255]);
        let raw = cmd.to_bytes();
        assert_eq!(raw[4], 0xFF);
        assert_eq!(raw.len(), 5 + 255);
        assert_eq!(parse_apdu(&raw).unwrap(), cmd);
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "need the extended form")]
    fn test_to_bytes_refuses_oversized_data() {
        APDU::with_data(0x00, ins::SELECT, 0x04, 0x00, vec![0x5A; 256]).to_bytes();
    }

    #[test]
    fn test_inconsistent_lc() {
        assert_eq!(
            parse_apdu(&[0x80, 0xAE, 0x80, 0x00, 0x09, 0x01, 0x02]),
            Err(APDUError::InvalidLength)
        );
    }

    #[test]
    fn test_too_short() {
        assert!(matches!(
            parse_apdu(&[0x00, 0xA4, 0x04]),
            Err(APDUError::TooShort(3))
        ));
        assert_eq!(APDUError::TooShort(3).status_word(), SW::UNKNOWN_ERROR);
        assert_eq!(APDUError::InvalidLength.status_word(), SW::WRONG_LENGTH);
    }

    #[test]
    fn test_extended_forms() {
        let apdu = parse_apdu(&[0x80, 0xAE, 0x80, 0x00, 0x00, 0x00, 0x02, 0xAA, 0xBB, 0x00, 0x00]).unwrap();
        assert_eq!(apdu.data, vec![0xAA, 0xBB]);
        assert_eq!(apdu.le, Some(65536));

        let apdu = parse_apdu(&[0x00, 0xB2, 0x01, 0x0C, 0x00, 0x01, 0x00]).unwrap();
        assert!(apdu.data.is_empty());
        assert_eq!(apdu.le, Some(256));
    }

    #[test]
    fn test_p1p2_helper() {
        let apdu = parse_apdu(&[0x00, 0xB2, 0x01, 0x0C]).unwrap();
        assert_eq!(apdu.p1p2(), 0x010C);
    }
}
