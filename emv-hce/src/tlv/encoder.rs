//! BER-TLV encoding
//!
//! Every tag up to three bytes and every length has a representation, so
//! nothing here can fail.

/// `tag || length || value` encoding
pub struct TLVEncoder;

impl TLVEncoder {
    pub fn encode(tag: u32, value: &[u8]) -> Vec<u8> {
        let mut out = Self::encode_tag(tag);
        out.extend(Self::encode_length(value.len()));
        out.extend_from_slice(value);
        out
    }

    /// Tag bytes, as many as its magnitude needs (1 to 3)
    ///
    /// The width comes from the value, not from the subsequent-byte bits, so
    /// only well-formed BER tags survive a parse: `0x9F` alone or `0x5A9F`
    /// would be read back differently.
    pub fn encode_tag(tag: u32) -> Vec<u8> {
        debug_assert!(is_well_formed_tag(tag), "not a BER tag: {tag:X}");
        let width = match tag {
            0..=0xFF => 1,
            0x100..=0xFFFF => 2,
            _ => 3,
        };
        tag.to_be_bytes()[4 - width..].to_vec()
    }

    /// Short form up to 0x7F, then 0x81..=0x84 followed by the big-endian length
    ///
    /// Lengths past `u32::MAX` have no four-byte form.
    pub fn encode_length(length: usize) -> Vec<u8> {
        debug_assert!(length as u64 <= u32::MAX as u64, "length {length} too large");
        if length <= 0x7F {
            return vec![length as u8];
        }
        let bytes = (length as u32).to_be_bytes();
        let skip = bytes.iter().take_while(|b| **b == 0).count();
        let mut out = vec![0x80 | (4 - skip) as u8];
        out.extend_from_slice(&bytes[skip..]);
        out
    }
}

/// Whether the parser reads `tag` back as the same number
///
/// The first byte flags "more bytes" with low bits 1F, and every following
/// byte but the last has its high bit set.
pub fn is_well_formed_tag(tag: u32) -> bool {
    let [_, b1, b2, b3] = tag.to_be_bytes();
    let multi = |b: u8| b & 0x1F == 0x1F;
    match tag {
        0..=0xFF => !multi(b3),
        0x100..=0xFFFF => multi(b2) && b3 & 0x80 == 0,
        0x1_0000..=0xFF_FFFF => multi(b1) && b2 & 0x80 != 0 && b3 & 0x80 == 0,
        _ => false,
    }
}

/// Encoded TLVs joined back to back, no padding
pub fn concat(tlvs: &[&[u8]]) -> Vec<u8> {
    tlvs.concat()
}

/// Chains primitives and wraps them in constructed templates
///
/// ```ignore
/// let fci = TLVBuilder::new()
///     .add(tags::DF_NAME, aid)
///     .add_raw(&proprietary)
///     .wrap(tags::FCI_TEMPLATE)
///     .build();
/// ```
#[derive(Debug, Default)]
pub struct TLVBuilder {
    data: Vec<u8>,
}

impl TLVBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(mut self, tag: u32, value: &[u8]) -> Self {
        self.data.extend(TLVEncoder::encode(tag, value));
        self
    }

    /// Skips the tag entirely when there is no value
    pub fn add_opt(self, tag: u32, value: Option<&[u8]>) -> Self {
        match value {
            Some(v) => self.add(tag, v),
            None => self,
        }
    }

    /// Already-encoded TLVs
    pub fn add_raw(mut self, encoded: &[u8]) -> Self {
        self.data.extend_from_slice(encoded);
        self
    }

    /// Everything added so far becomes the value of `tag`
    pub fn wrap(self, tag: u32) -> Self {
        Self {
            data: TLVEncoder::encode(tag, &self.data),
        }
    }

    pub fn build(self) -> Vec<u8> {
        self.data
    }
}
