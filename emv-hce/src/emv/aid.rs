//! Application identifiers and card schemes

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// PPSE directory name "2PAY.SYS.DDF01"
pub const PPSE: &[u8] = b"2PAY.SYS.DDF01";

/// Visa credit/debit
pub const AID_VISA: [u8; 7] = [0xA0, 0x00, 0x00, 0x00, 0x03, 0x10, 0x10];

/// Mastercard credit/debit
pub const AID_MASTERCARD: [u8; 7] = [0xA0, 0x00, 0x00, 0x00, 0x04, 0x10, 0x10];

/// Card network of a token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Scheme {
    Visa,
    Mastercard,
}

impl Scheme {
    /// Payment application AID advertised in PPSE and matched on SELECT
    pub fn aid(self) -> &'static [u8] {
        match self {
            Scheme::Visa => &AID_VISA,
            Scheme::Mastercard => &AID_MASTERCARD,
        }
    }

    /// Label returned in the FCI of the selected application
    pub fn label(self) -> &'static str {
        match self {
            Scheme::Visa => "VISA DEBIT",
            Scheme::Mastercard => "MASTERCARD",
        }
    }

    pub fn from_aid(aid: &[u8]) -> Option<Self> {
        if aid == AID_VISA {
            Some(Scheme::Visa)
        } else if aid == AID_MASTERCARD {
            Some(Scheme::Mastercard)
        } else {
            None
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Scheme::Visa => "VISA",
            Scheme::Mastercard => "MASTERCARD",
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scheme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "VISA" => Ok(Scheme::Visa),
            "MASTERCARD" | "MC" => Ok(Scheme::Mastercard),
            other => Err(format!("unsupported card scheme: {}", other)),
        }
    }
}

/// What a SELECT command's data field names
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectTarget {
    Ppse,
    Application(Scheme),
}

impl SelectTarget {
    pub fn from_data(data: &[u8]) -> Option<Self> {
        if data == PPSE {
            Some(SelectTarget::Ppse)
        } else {
            Scheme::from_aid(data).map(SelectTarget::Application)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ppse_bytes() {
        assert_eq!(hex::encode_upper(PPSE), "325041592E5359532E4444463031");
    }

    #[test]
    fn test_scheme_aids() {
        assert_eq!(hex::encode_upper(Scheme::Visa.aid()), "A0000000031010");
        assert_eq!(hex::encode_upper(Scheme::Mastercard.aid()), "A0000000041010");
        assert_eq!(Scheme::from_aid(&AID_MASTERCARD), Some(Scheme::Mastercard));
        assert_eq!(Scheme::from_aid(&[0xA0, 0x00]), None);
    }

    #[test]
    fn test_select_target() {
        assert_eq!(SelectTarget::from_data(PPSE), Some(SelectTarget::Ppse));
        assert_eq!(
            SelectTarget::from_data(&AID_VISA),
            Some(SelectTarget::Application(Scheme::Visa))
        );
        // Partial AID does not match
        assert_eq!(SelectTarget::from_data(&AID_VISA[..5]), None);
        assert_eq!(SelectTarget::from_data(&[]), None);
    }

    #[test]
    fn test_scheme_serde_and_parse() {
        assert_eq!(serde_json::to_string(&Scheme::Mastercard).unwrap(), "\"MASTERCARD\"");
        assert_eq!(serde_json::from_str::<Scheme>("\"VISA\"").unwrap(), Scheme::Visa);
        assert_eq!("visa".parse::<Scheme>().unwrap(), Scheme::Visa);
        assert!("AMEX".parse::<Scheme>().is_err());
    }
}
