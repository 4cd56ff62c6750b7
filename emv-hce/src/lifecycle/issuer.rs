//! Card issuer collaborator
//!
//! The issuer of record owns the funding card, mints DPANs, and derives EMV
//! session keys. Real processors sit behind [`CardIssuer`]; [`DevCardIssuer`]
//! is a deterministic local stand-in.

use std::collections::{HashMap, HashSet};
use std::fmt;

use chrono::{Datelike, Utc};
use hmac::{Hmac, Mac};
use log::info;
use parking_lot::RwLock;
use sha2::Sha256;
use thiserror::Error;

use crate::crypto::sha256_hex;
use crate::emv::{mask_pan, Scheme};

/// Issuer statuses a card may report
pub mod status {
    pub const ACTIVE: &str = "ACTIVE";
    pub const UNVERIFIED: &str = "UNVERIFIED";
    pub const SUSPENDED: &str = "SUSPENDED";
    pub const TERMINATED: &str = "TERMINATED";
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IssuerError {
    #[error("Card {0} not found at issuer")]
    CardNotFound(String),

    #[error("Unknown token reference")]
    UnknownTokenReference,

    #[error("ATC exhausted")]
    AtcExhausted,

    #[error("Issuer unavailable: {0}")]
    Unavailable(String),
}

/// Funding card as the issuer reports it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuerCard {
    pub card_id: String,
    pub status: String,
    pub scheme: Scheme,
}

impl IssuerCard {
    /// Cards still pending verification can be provisioned
    pub fn is_active(&self) -> bool {
        self.status == status::ACTIVE || self.status == status::UNVERIFIED
    }
}

/// Result of minting a DPAN for a device
#[derive(Clone, PartialEq, Eq)]
pub struct DigitalCard {
    pub dpan: String,
    pub expiry_month: u8,
    pub expiry_year: u16,
    pub token_reference: String,
    pub status: String,
    /// Session key for the first tap window, ATC 0
    pub session_key: String,
}

impl fmt::Debug for DigitalCard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DigitalCard")
            .field("dpan", &mask_pan(&self.dpan))
            .field("expiry_month", &self.expiry_month)
            .field("expiry_year", &self.expiry_year)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

/// Fresh session key and the ATC it belongs to
#[derive(Clone, PartialEq, Eq)]
pub struct SessionKeys {
    pub session_key: String,
    pub atc: u16,
}

impl fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionKeys")
            .field("session_key", &"<redacted>")
            .field("atc", &self.atc)
            .finish()
    }
}

/// Issuer-of-record operations the lifecycle manager depends on
pub trait CardIssuer: Send + Sync {
    /// Status and scheme of the funding card
    fn card_status(&self, card_id: &str) -> Result<IssuerCard, IssuerError>;

    /// Mint a DPAN bound to a device
    fn provision_digital_card(
        &self,
        card_id: &str,
        device_id: &str,
        device_fingerprint: &str,
    ) -> Result<DigitalCard, IssuerError>;

    /// Derive the next session key; the returned ATC is `current_atc + 1`
    fn generate_session_keys(
        &self,
        token_reference: &str,
        current_atc: u16,
    ) -> Result<SessionKeys, IssuerError>;

    /// Revoke a DPAN
    fn deactivate_digital_card(&self, token_reference: &str) -> Result<(), IssuerError>;

    /// Issuer-side status of a DPAN
    fn digital_card_status(&self, token_reference: &str) -> Result<String, IssuerError>;
}

/// Local issuer: every card is an ACTIVE Visa unless overridden, DPANs are a
/// fixed test number, and keys derive deterministically from the token reference
#[derive(Default)]
pub struct DevCardIssuer {
    cards: RwLock<HashMap<String, IssuerCard>>,
    revoked: RwLock<HashSet<String>>,
}

impl DevCardIssuer {
    pub const DPAN: &'static str = "4000000000001234";

    pub fn new() -> Self {
        Self::default()
    }

    /// Override what `card_status` reports for `card_id`
    pub fn set_card(&self, card_id: &str, status: &str, scheme: Scheme) {
        self.cards.write().insert(
            card_id.to_string(),
            IssuerCard {
                card_id: card_id.to_string(),
                status: status.to_string(),
                scheme,
            },
        );
    }

    /// Revoke a DPAN on the issuer side, as a fraud team would
    pub fn revoke(&self, token_reference: &str) {
        self.revoked.write().insert(token_reference.to_string());
    }

    /// Deterministic token reference for a (card, device, fingerprint) triple
    pub fn token_reference(card_id: &str, device_id: &str, device_fingerprint: &str) -> String {
        sha256_hex(&format!("{}:{}:{}", card_id, device_id, device_fingerprint))
    }

    /// Session key for `atc`: hex HMAC-SHA256 keyed by the token reference
    pub fn session_key(token_reference: &str, atc: u16) -> Result<String, IssuerError> {
        let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(token_reference.as_bytes())
            .map_err(|e| IssuerError::Unavailable(e.to_string()))?;
        mac.update(atc.to_string().as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }
}

impl CardIssuer for DevCardIssuer {
    fn card_status(&self, card_id: &str) -> Result<IssuerCard, IssuerError> {
        Ok(self.cards.read().get(card_id).cloned().unwrap_or_else(|| IssuerCard {
            card_id: card_id.to_string(),
            status: status::ACTIVE.to_string(),
            scheme: Scheme::Visa,
        }))
    }

    fn provision_digital_card(
        &self,
        card_id: &str,
        device_id: &str,
        device_fingerprint: &str,
    ) -> Result<DigitalCard, IssuerError> {
        let token_reference = Self::token_reference(card_id, device_id, device_fingerprint);
        let now = Utc::now();
        // Re-provisioning the same triple mints a live DPAN again
        self.revoked.write().remove(&token_reference);
        info!("DEV: digital card provisioned for card {}", card_id);

        Ok(DigitalCard {
            dpan: Self::DPAN.to_string(),
            expiry_month: now.month() as u8,
            expiry_year: (now.year() + 3) as u16,
            session_key: Self::session_key(&token_reference, 0)?,
            token_reference,
            status: status::ACTIVE.to_string(),
        })
    }

    fn generate_session_keys(
        &self,
        token_reference: &str,
        current_atc: u16,
    ) -> Result<SessionKeys, IssuerError> {
        let atc = current_atc.checked_add(1).ok_or(IssuerError::AtcExhausted)?;
        Ok(SessionKeys {
            session_key: Self::session_key(token_reference, atc)?,
            atc,
        })
    }

    fn deactivate_digital_card(&self, token_reference: &str) -> Result<(), IssuerError> {
        self.revoke(token_reference);
        Ok(())
    }

    fn digital_card_status(&self, token_reference: &str) -> Result<String, IssuerError> {
        if self.revoked.read().contains(token_reference) {
            Ok(status::TERMINATED.to_string())
        } else {
            Ok(status::ACTIVE.to_string())
        }
    }
}
