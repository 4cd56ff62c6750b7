//! Token lifecycle manager
//!
//! Server-side source of truth for credential tokens: provision, refresh,
//! deactivate, and payload delivery. The device only ever holds a time-boxed
//! copy of what `get_payload` returns.

use std::sync::Arc;

use chrono::Utc;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use rsa::RsaPrivateKey;
use thiserror::Error;
use uuid::Uuid;
use zeroize::Zeroizing;

use super::issuer::{self, CardIssuer, IssuerError};
use super::store::{StoreError, TokenStore};
use super::token::{
    DeactivationOutcome, ProvisionedToken, RefreshedSession, TokenRecord, TokenStatus,
    TokenSummary,
};
use crate::config::LifecycleConfig;
use crate::crypto::{self, AtRestCipher, CryptoError};
use crate::emv::{mask_pan, PaymentPayload};

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Card is not active at the issuer (status {status})")]
    CardNotActive { status: String },

    #[error("Token {token_id} is not active (status {status})")]
    TokenNotActive { token_id: Uuid, status: String },

    #[error("Token {0} not found")]
    TokenNotFound(Uuid),

    #[error("Token {0} expired, refresh required")]
    TokenExpired(Uuid),

    #[error("Issuer returned ATC {returned} not above stored {stored}")]
    AtcNotIncreasing { stored: u16, returned: u16 },

    #[error("Issuer error: {0}")]
    Issuer(#[from] IssuerError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, LifecycleError>;

/// Issues, rotates and revokes credential tokens
///
/// Operations that read a record and write it back run one at a time, so a
/// refresh can never resurrect a token that a concurrent deactivate revoked.
/// Token-scoped calls take the caller's user id; another user's token is
/// reported as not found.
pub struct TokenLifecycleManager {
    issuer: Arc<dyn CardIssuer>,
    store: Arc<dyn TokenStore>,
    cipher: AtRestCipher,
    config: LifecycleConfig,
    writes: Mutex<()>,
}

impl TokenLifecycleManager {
    pub fn new(
        issuer: Arc<dyn CardIssuer>,
        store: Arc<dyn TokenStore>,
        config: LifecycleConfig,
    ) -> std::result::Result<Self, CryptoError> {
        let cipher = config.at_rest_cipher()?;
        Ok(Self::with_cipher(issuer, store, cipher, config))
    }

    pub fn with_cipher(
        issuer: Arc<dyn CardIssuer>,
        store: Arc<dyn TokenStore>,
        cipher: AtRestCipher,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            issuer,
            store,
            cipher,
            config,
            writes: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    /// Provision a new token for `card_id` on the device `device_fingerprint`
    ///
    /// An ACTIVE token already bound to the same card and device is
    /// superseded: revoked at the issuer and marked DEACTIVATED first.
    pub fn provision(
        &self,
        user_id: &str,
        card_id: &str,
        device_fingerprint: &str,
    ) -> Result<ProvisionedToken> {
        let _guard = self.writes.lock();
        let card = self.issuer.card_status(card_id)?;
        if !card.is_active() {
            warn!("Provision refused: card {} is {}", card_id, card.status);
            return Err(LifecycleError::CardNotActive {
                status: card.status,
            });
        }

        for previous in self
            .store
            .find_active_by_card_and_device(card_id, device_fingerprint)?
        {
            info!("Superseding token {} for card {}", previous.token_id, card_id);
            self.revoke(previous)?;
        }

        let device_id = device_id(user_id, device_fingerprint);
        let digital = self
            .issuer
            .provision_digital_card(card_id, &device_id, device_fingerprint)?;

        let now = Utc::now();
        let record = TokenRecord {
            token_id: Uuid::now_v7(),
            user_id: user_id.to_string(),
            card_id: card_id.to_string(),
            device_fingerprint: device_fingerprint.to_string(),
            token_reference: digital.token_reference,
            encrypted_dpan: self.cipher.encrypt_str(&digital.dpan)?,
            dpan_last4: last4(&digital.dpan),
            expiry_month: digital.expiry_month,
            expiry_year: digital.expiry_year,
            encrypted_session_key: self.cipher.encrypt_str(&digital.session_key)?,
            atc: 0,
            scheme: card.scheme,
            status: TokenStatus::Active,
            expires_at: now + self.config.session_key_ttl_chrono(),
            created_at: now,
            updated_at: now,
        };

        let provisioned = ProvisionedToken {
            token_id: record.token_id,
            status: record.status,
            expires_at: record.expires_at,
        };
        info!(
            "Provisioned token {} for card {} ({}, {})",
            record.token_id,
            card_id,
            record.scheme,
            mask_pan(&digital.dpan)
        );
        self.store.insert(record)?;
        Ok(provisioned)
    }

    /// Decrypted credential for the active token slot
    pub fn get_payload(&self, user_id: &str, token_id: &Uuid) -> Result<PaymentPayload> {
        let record = self.load_owned(user_id, token_id)?;
        if !record.is_active() {
            return Err(not_active(&record));
        }
        if record.is_expired() {
            debug!("Token {} expired at {}", token_id, record.expires_at);
            return Err(LifecycleError::TokenExpired(*token_id));
        }

        Ok(PaymentPayload {
            token_id: record.token_id.to_string(),
            dpan: self.cipher.decrypt_string(&record.encrypted_dpan)?,
            expiry_month: record.expiry_month,
            expiry_year: record.expiry_year,
            session_key: self.cipher.decrypt_string(&record.encrypted_session_key)?,
            atc: record.atc,
            scheme: record.scheme,
            aid: hex::encode_upper(record.scheme.aid()),
            expires_at: record.expires_at,
        })
    }

    /// The payload as JSON, sealed to the device's RSA public key
    pub fn deliver_payload(
        &self,
        user_id: &str,
        token_id: &Uuid,
        device_public_key: &str,
    ) -> Result<String> {
        let public_key = crypto::load_public_key(device_public_key)?;
        let payload = self.get_payload(user_id, token_id)?;
        let json = Zeroizing::new(serde_json::to_vec(&payload)?);
        let envelope = crypto::seal(&json, &public_key)?;
        debug!("Sealed payload for token {}", token_id);
        Ok(envelope)
    }

    /// Rotate the session key; the issuer supplies the next ATC
    pub fn refresh(&self, user_id: &str, token_id: &Uuid) -> Result<RefreshedSession> {
        let _guard = self.writes.lock();
        let mut record = self.load_owned(user_id, token_id)?;
        if !record.is_active() {
            return Err(not_active(&record));
        }

        let external = self.issuer.digital_card_status(&record.token_reference)?;
        if external != issuer::status::ACTIVE {
            warn!(
                "DPAN for token {} is {} at issuer, deactivating",
                token_id, external
            );
            record.status = TokenStatus::Deactivated;
            record.updated_at = Utc::now();
            self.store.update(&record)?;
            return Err(LifecycleError::TokenNotActive {
                token_id: *token_id,
                status: external,
            });
        }

        let keys = self
            .issuer
            .generate_session_keys(&record.token_reference, record.atc)?;
        if keys.atc <= record.atc {
            error!(
                "Issuer ATC {} for token {} does not advance stored {}",
                keys.atc, token_id, record.atc
            );
            return Err(LifecycleError::AtcNotIncreasing {
                stored: record.atc,
                returned: keys.atc,
            });
        }

        let now = Utc::now();
        record.encrypted_session_key = self.cipher.encrypt_str(&keys.session_key)?;
        record.atc = keys.atc;
        record.expires_at = now + self.config.session_key_ttl_chrono();
        record.updated_at = now;
        self.store.update(&record)?;

        info!("Refreshed token {}, ATC {}", token_id, record.atc);
        Ok(RefreshedSession {
            session_key: keys.session_key,
            atc: record.atc,
            expires_at: record.expires_at,
        })
    }

    /// Revoke a token; repeating the call is a no-op
    ///
    /// The issuer is always asked first. Its failure is logged and the local
    /// status still becomes DEACTIVATED.
    pub fn deactivate(&self, user_id: &str, token_id: &Uuid) -> Result<DeactivationOutcome> {
        let _guard = self.writes.lock();
        let record = self.load_owned(user_id, token_id)?;
        if record.status == TokenStatus::Deactivated {
            debug!("Token {} already deactivated", token_id);
            return Ok(DeactivationOutcome {
                status: TokenStatus::Deactivated,
            });
        }
        let status = self.revoke(record)?;
        Ok(DeactivationOutcome { status })
    }

    /// Deactivate every ACTIVE token on a card; returns how many were revoked
    pub fn deactivate_all_for_card(&self, card_id: &str) -> Result<usize> {
        let _guard = self.writes.lock();
        let tokens = self.store.find_active_by_card(card_id)?;
        let count = tokens.len();
        for record in tokens {
            self.revoke(record)?;
        }
        if count > 0 {
            info!("Deactivated {} tokens for card {}", count, card_id);
        }
        Ok(count)
    }

    /// The user's ACTIVE tokens; revoked ones are history, not listed
    pub fn list_tokens(&self, user_id: &str) -> Result<Vec<TokenSummary>> {
        Ok(self
            .store
            .list_by_user(user_id)?
            .iter()
            .filter(|t| t.is_active())
            .map(TokenRecord::summary)
            .collect())
    }

    pub fn is_expired(&self, user_id: &str, token_id: &Uuid) -> Result<bool> {
        Ok(self.load_owned(user_id, token_id)?.is_expired())
    }

    fn load_owned(&self, user_id: &str, token_id: &Uuid) -> Result<TokenRecord> {
        match self.store.get(token_id)? {
            Some(record) if record.user_id == user_id => Ok(record),
            Some(_) => {
                warn!("Token {} requested by a user who does not own it", token_id);
                Err(LifecycleError::TokenNotFound(*token_id))
            }
            None => Err(LifecycleError::TokenNotFound(*token_id)),
        }
    }

    fn revoke(&self, mut record: TokenRecord) -> Result<TokenStatus> {
        if let Err(e) = self.issuer.deactivate_digital_card(&record.token_reference) {
            error!(
                "Issuer deactivation failed for token {}: {}",
                record.token_id, e
            );
        }
        record.status = TokenStatus::Deactivated;
        record.updated_at = Utc::now();
        self.store.update(&record)?;
        info!("Token {} deactivated", record.token_id);
        Ok(record.status)
    }
}

/// Device side: open a delivered envelope into a slot payload
pub fn open_payload(envelope: &str, device_key: &RsaPrivateKey) -> Result<PaymentPayload> {
    let json = Zeroizing::new(crypto::open(envelope, device_key)?);
    Ok(serde_json::from_slice(&json)?)
}

fn not_active(record: &TokenRecord) -> LifecycleError {
    LifecycleError::TokenNotActive {
        token_id: record.token_id,
        status: record.status.to_string(),
    }
}

fn device_id(user_id: &str, device_fingerprint: &str) -> String {
    let short: String = device_fingerprint.chars().take(16).collect();
    format!("{}:{}", user_id, short)
}

fn last4(pan: &str) -> String {
    let skip = pan.chars().count().saturating_sub(4);
    pan.chars().skip(skip).collect()
}
