//! EMV response templates
//!
//! Builders for the data field of each response the responder sends. The
//! status word trailer is added by the caller.

use chrono::{Datelike, NaiveDate};

use crate::tlv::{concat, tags, tlv, TLVBuilder};
use super::aid::PPSE;
use super::TapError;

/// PDOL: terminal country code (2 bytes) and amount authorised (6 bytes)
pub const PDOL: [u8; 6] = [0x9F, 0x1A, 0x02, 0x9F, 0x02, 0x06];

/// Application Interchange Profile: terminal risk management, EMV mode, no CVM
pub const AIP: [u8; 2] = [0x08, 0x80];

/// Application File Locator: SFI 1, records 1..=1, one record for ODA
pub const AFL: [u8; 4] = [0x08, 0x01, 0x01, 0x01];

/// Cryptogram Information Data: ARQC
pub const CID_ARQC: u8 = 0x80;

/// Issuer Application Data carried in the record
pub const ISSUER_APPLICATION_DATA: [u8; 7] = [0x06, 0x01, 0x0A, 0x03, 0xA4, 0x80, 0x00];

/// PPSE directory listing one payment application
///
/// `6F { 84 PPSE, A5 { BF0C { 61 { 4F aid, 50 label, 87 01 } } } }`
pub fn ppse_response(aid: &[u8], label: &str) -> Vec<u8> {
    let entry = TLVBuilder::new()
        .add(tags::AID, aid)
        .add(tags::APPLICATION_LABEL, label.as_bytes())
        .add(tags::APPLICATION_PRIORITY, &[0x01])
        .wrap(tags::DIRECTORY_ENTRY)
        .wrap(tags::FCI_ISSUER_DISCRETIONARY)
        .wrap(tags::FCI_PROPRIETARY)
        .build();

    TLVBuilder::new()
        .add(tags::DF_NAME, PPSE)
        .add_raw(&entry)
        .wrap(tags::FCI_TEMPLATE)
        .build()
}

/// FCI for a selected payment application
///
/// `6F { 84 aid, A5 { 50 label, [9F38 pdol] } }`
pub fn select_response(aid: &[u8], label: &str, pdol: Option<&[u8]>) -> Vec<u8> {
    let proprietary = TLVBuilder::new()
        .add(tags::APPLICATION_LABEL, label.as_bytes())
        .add_opt(tags::PDOL, pdol)
        .wrap(tags::FCI_PROPRIETARY)
        .build();

    TLVBuilder::new()
        .add(tags::DF_NAME, aid)
        .add_raw(&proprietary)
        .wrap(tags::FCI_TEMPLATE)
        .build()
}

/// Format 1 GPO response: `80 { AIP || AFL }`
pub fn gpo_response(aip: &[u8], afl: &[u8]) -> Vec<u8> {
    tlv(tags::RESPONSE_FORMAT_1, &concat(&[aip, afl]))
}

/// Record template for READ RECORD
///
/// `70 { 5A pan, 5F24 expiry, 9F27 80, 9F36 atc, 9F10 iad }`
pub fn record_response(
    dpan: &str,
    expiry_year: u16,
    expiry_month: u8,
    atc: u16,
) -> Result<Vec<u8>, TapError> {
    let pan = pan_bcd(dpan)?;
    let expiry = expiry_bcd(expiry_year, expiry_month)?;

    Ok(TLVBuilder::new()
        .add(tags::PAN, &pan)
        .add(tags::EXPIRY_DATE, &expiry)
        .add(tags::CRYPTOGRAM_INFO, &[CID_ARQC])
        .add(tags::ATC, &atc.to_be_bytes())
        .add(tags::ISSUER_APPLICATION_DATA, &ISSUER_APPLICATION_DATA)
        .wrap(tags::RECORD_TEMPLATE)
        .build())
}

/// Format 2 GENERATE AC response: `77 { 9F27 cid, 9F36 atc, 9F26 ac }`
pub fn generate_ac_response(cid: u8, atc: u16, cryptogram: &[u8]) -> Vec<u8> {
    let body = concat(&[
        tlv(tags::CRYPTOGRAM_INFO, &[cid]).as_slice(),
        tlv(tags::ATC, &atc.to_be_bytes()).as_slice(),
        tlv(tags::APPLICATION_CRYPTOGRAM, cryptogram).as_slice(),
    ]);
    tlv(tags::RESPONSE_FORMAT_2, &body)
}

/// PAN digits packed two per byte, padded with F when odd
pub fn pan_bcd(pan: &str) -> Result<Vec<u8>, TapError> {
    if pan.is_empty() || !pan.bytes().all(|b| b.is_ascii_digit()) {
        return Err(TapError::InvalidCredential("DPAN must be decimal digits".to_string()));
    }
    let mut digits = pan.to_string();
    if digits.len() % 2 == 1 {
        digits.push('F');
    }
    hex::decode(digits).map_err(|e| TapError::InvalidCredential(e.to_string()))
}

/// Expiry as BCD YYMMDD with DD the last day of the month
pub fn expiry_bcd(year: u16, month: u8) -> Result<[u8; 3], TapError> {
    let day = last_day_of_month(year, month)
        .ok_or_else(|| TapError::InvalidCredential(format!("bad expiry {}/{}", month, year)))?;
    Ok([bcd((year % 100) as u8), bcd(month), bcd(day)])
}

fn last_day_of_month(year: u16, month: u8) -> Option<u8> {
    let (next_year, next_month) = if month == 12 {
        (year as i32 + 1, 1)
    } else {
        (year as i32, month as u32 + 1)
    };
    let first_of_next = NaiveDate::from_ymd_opt(next_year, next_month, 1)?;
    // Reject month 0 and anything the calendar does not know
    NaiveDate::from_ymd_opt(year as i32, month as u32, 1)?;
    first_of_next.pred_opt().map(|d| d.day() as u8)
}

fn bcd(value: u8) -> u8 {
    ((value / 10) << 4) | (value % 10)
}
