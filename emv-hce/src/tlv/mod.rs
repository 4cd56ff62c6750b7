//! TLV (Tag-Length-Value) encoding and decoding
//!
//! BER-TLV as used by EMV: 1-3 byte tags, short and long length forms.
//! Every response the contactless responder emits is built from these.
//!
//! # Example
//! ```ignore
//! use emv_hce::tlv::{read_list, tags, TLVEncoder};
//!
//! let fci = TLVEncoder::encode(tags::FCI_TEMPLATE, &TLVEncoder::encode(tags::DF_NAME, aid));
//! let tlvs = read_list(&fci, true);
//! assert_eq!(tlvs[0].find(tags::DF_NAME).unwrap().value, aid);
//! ```

mod encoder;
mod parser;

pub use encoder::{concat, is_well_formed_tag, TLVBuilder, TLVEncoder};
pub use parser::{find_in, read_list, TLVError, TLVParser, TLV};

/// Encode a single tag-value pair, shorthand for [`TLVEncoder::encode`]
pub fn tlv(tag: u32, value: &[u8]) -> Vec<u8> {
    TLVEncoder::encode(tag, value)
}

/// Convert a byte slice to a spaced hex string for logs
pub fn hexify(value: &[u8]) -> String {
    value.iter().map(|b| format!("{:02X}", b)).collect::<Vec<_>>().join(" ")
}

/// EMV tag constants used by the contactless responder
pub mod tags {
    // Templates
    pub const FCI_TEMPLATE: u32 = 0x6F;
    pub const FCI_PROPRIETARY: u32 = 0xA5;
    pub const FCI_ISSUER_DISCRETIONARY: u32 = 0xBF0C;
    pub const DIRECTORY_ENTRY: u32 = 0x61;
    pub const RECORD_TEMPLATE: u32 = 0x70;
    pub const RESPONSE_FORMAT_1: u32 = 0x80;
    pub const RESPONSE_FORMAT_2: u32 = 0x77;

    // Application selection
    pub const DF_NAME: u32 = 0x84;
    pub const AID: u32 = 0x4F;
    pub const APPLICATION_LABEL: u32 = 0x50;
    pub const APPLICATION_PRIORITY: u32 = 0x87;
    pub const PDOL: u32 = 0x9F38;

    // PDOL entries
    pub const TERMINAL_COUNTRY_CODE: u32 = 0x9F1A;
    pub const AMOUNT_AUTHORISED: u32 = 0x9F02;

    // Processing options
    pub const AIP: u32 = 0x82;
    pub const AFL: u32 = 0x94;

    // Record data
    pub const PAN: u32 = 0x5A;
    pub const EXPIRY_DATE: u32 = 0x5F24;
    pub const ISSUER_APPLICATION_DATA: u32 = 0x9F10;

    // Cryptogram
    pub const CRYPTOGRAM_INFO: u32 = 0x9F27;
    pub const ATC: u32 = 0x9F36;
    pub const APPLICATION_CRYPTOGRAM: u32 = 0x9F26;
}
