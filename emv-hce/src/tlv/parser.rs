//! BER-TLV decoding
//!
//! The responder only emits TLVs. Decoding checks what it emitted and plays
//! the terminal's side in simulations.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TLVError {
    #[error("Data ends inside a tag")]
    TruncatedTag,

    #[error("Data ends inside a length")]
    TruncatedLength,

    #[error("Value runs past the end of the data")]
    TruncatedValue,

    #[error("Indefinite length (0x80) is not used in EMV")]
    IndefiniteLength,

    #[error("{0} length bytes, at most 4 supported")]
    LengthTooLarge(usize),
}

/// One decoded data object
///
/// `subs` holds the children of a constructed object when it was read
/// recursively; `value` always keeps the raw bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TLV {
    pub tag: u32,
    pub value: Vec<u8>,
    pub subs: Vec<TLV>,
}

impl TLV {
    pub fn new(tag: u32, value: Vec<u8>) -> Self {
        Self {
            tag,
            value,
            subs: Vec::new(),
        }
    }

    /// Bit 6 of the leading tag byte
    pub fn is_constructed(&self) -> bool {
        is_constructed_tag(self.tag)
    }

    /// Depth-first search starting with `self`
    pub fn find(&self, tag: u32) -> Option<&TLV> {
        if self.tag == tag {
            Some(self)
        } else {
            self.subs.iter().find_map(|sub| sub.find(tag))
        }
    }

    pub fn find_child(&self, tag: u32) -> Option<&TLV> {
        self.subs.iter().find(|sub| sub.tag == tag)
    }
}

/// Depth-first search over a list of top-level objects
pub fn find_in(tlvs: &[TLV], tag: u32) -> Option<&TLV> {
    tlvs.iter().find_map(|t| t.find(tag))
}

fn is_constructed_tag(tag: u32) -> bool {
    let lead = tag.to_be_bytes().into_iter().find(|b| *b != 0).unwrap_or(0);
    lead & 0x20 != 0
}

/// Lenient read: skips 00/FF filler and stops quietly at the first bad object
pub fn read_list(data: &[u8], recursive: bool) -> Vec<TLV> {
    let mut out = Vec::new();
    let mut rest = data;
    loop {
        rest = match rest {
            [0x00 | 0xFF, tail @ ..] => tail,
            [] => break,
            _ => match read_single(rest, recursive) {
                Ok((tlv, tail)) => {
                    out.push(tlv);
                    tail
                }
                Err(_) => break,
            },
        };
    }
    out
}

/// One TLV and the bytes after it
fn read_single(data: &[u8], recursive: bool) -> Result<(TLV, &[u8]), TLVError> {
    let (tag, tag_len) = read_tag(data)?;
    let (length, len_len) = read_length(&data[tag_len..])?;

    let body = &data[tag_len + len_len..];
    if body.len() < length {
        return Err(TLVError::TruncatedValue);
    }
    let (value, tail) = body.split_at(length);

    let subs = if recursive && is_constructed_tag(tag) {
        read_list(value, true)
    } else {
        Vec::new()
    };
    let tlv = TLV {
        tag,
        value: value.to_vec(),
        subs,
    };
    Ok((tlv, tail))
}

/// Tag of 1 to 3 bytes: low five bits all set means a second byte follows,
/// and a set high bit on that one means a third
fn read_tag(data: &[u8]) -> Result<(u32, usize), TLVError> {
    let mut tag = 0u32;
    for (i, &b) in data.iter().take(3).enumerate() {
        tag = (tag << 8) | b as u32;
        let more = match i {
            0 => b & 0x1F == 0x1F,
            1 => b & 0x80 != 0,
            _ => false,
        };
        if !more {
            return Ok((tag, i + 1));
        }
    }
    Err(TLVError::TruncatedTag)
}

/// Returns (length, bytes used)
fn read_length(data: &[u8]) -> Result<(usize, usize), TLVError> {
    let (&first, rest) = data.split_first().ok_or(TLVError::TruncatedLength)?;
    if first < 0x80 {
        return Ok((first as usize, 1));
    }

    let count = (first & 0x7F) as usize;
    match count {
        0 => Err(TLVError::IndefiniteLength),
        1..=4 => {
            let bytes = rest.get(..count).ok_or(TLVError::TruncatedLength)?;
            let length = bytes.iter().fold(0usize, |acc, &b| (acc << 8) | b as usize);
            Ok((length, 1 + count))
        }
        _ => Err(TLVError::LengthTooLarge(count)),
    }
}

/// Strict reading: every byte must belong to a well-formed object
pub struct TLVParser;

impl TLVParser {
    pub fn parse(data: &[u8]) -> Result<Vec<TLV>, TLVError> {
        let mut out = Vec::new();
        let mut rest = data;
        while !rest.is_empty() {
            let (tlv, tail) = read_single(rest, true)?;
            out.push(tlv);
            rest = tail;
        }
        Ok(out)
    }

    /// Returns the object and how many bytes it took
    pub fn parse_one(data: &[u8]) -> Result<(TLV, usize), TLVError> {
        let (tlv, tail) = read_single(data, true)?;
        Ok((tlv, data.len() - tail.len()))
    }
}
