//! Token records and API shapes

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::emv::Scheme;

/// Lifecycle status of a credential token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TokenStatus {
    Active,
    Suspended,
    Deactivated,
}

impl TokenStatus {
    /// DEACTIVATED is terminal
    pub fn can_transition_to(self, next: TokenStatus) -> bool {
        !matches!(self, TokenStatus::Deactivated) || next == TokenStatus::Deactivated
    }
}

impl fmt::Display for TokenStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TokenStatus::Active => "ACTIVE",
            TokenStatus::Suspended => "SUSPENDED",
            TokenStatus::Deactivated => "DEACTIVATED",
        };
        f.write_str(s)
    }
}

/// A provisioned, device-bound card proxy as the server stores it
///
/// DPAN and session key are only held encrypted at rest.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    pub token_id: Uuid,
    pub user_id: String,
    pub card_id: String,
    pub device_fingerprint: String,
    /// Issuer's reference for the DPAN
    pub token_reference: String,
    pub encrypted_dpan: String,
    /// Last four DPAN digits, for lists and logs
    pub dpan_last4: String,
    pub expiry_month: u8,
    pub expiry_year: u16,
    pub encrypted_session_key: String,
    pub atc: u16,
    pub scheme: Scheme,
    pub status: TokenStatus,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TokenRecord {
    pub fn is_active(&self) -> bool {
        self.status == TokenStatus::Active
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// True when the session window has passed and a refresh is required
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Same card on the same device
    pub fn binds(&self, card_id: &str, device_fingerprint: &str) -> bool {
        self.card_id == card_id && self.device_fingerprint == device_fingerprint
    }

    pub fn summary(&self) -> TokenSummary {
        TokenSummary {
            token_id: self.token_id,
            card_id: self.card_id.clone(),
            scheme: self.scheme,
            device_fingerprint: self.device_fingerprint.clone(),
            status: self.status,
            atc: self.atc,
            expires_at: self.expires_at,
        }
    }
}

impl fmt::Debug for TokenRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenRecord")
            .field("token_id", &self.token_id)
            .field("user_id", &self.user_id)
            .field("card_id", &self.card_id)
            .field("dpan_last4", &self.dpan_last4)
            .field("atc", &self.atc)
            .field("scheme", &self.scheme)
            .field("status", &self.status)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

/// Response to `provision`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionedToken {
    pub token_id: Uuid,
    pub status: TokenStatus,
    pub expires_at: DateTime<Utc>,
}

/// Response to `refresh`
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshedSession {
    pub session_key: String,
    pub atc: u16,
    pub expires_at: DateTime<Utc>,
}

impl fmt::Debug for RefreshedSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshedSession")
            .field("session_key", &"<redacted>")
            .field("atc", &self.atc)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Response to `deactivate`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeactivationOutcome {
    pub status: TokenStatus,
}

/// Entry of `list_tokens`; carries no key material and no DPAN
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSummary {
    pub token_id: Uuid,
    pub card_id: String,
    pub scheme: Scheme,
    pub device_fingerprint: String,
    pub status: TokenStatus,
    pub atc: u16,
    pub expires_at: DateTime<Utc>,
}
