//! Active token slot
//!
//! Holds the one decrypted credential the responder taps with. The app
//! writes it before a tap; the responder reads it during the tap. Values are
//! swapped whole behind an `Arc`, so a reader gets either the old or the new
//! credential and never holds the lock while answering an APDU.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, info};
use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use super::aid::Scheme;

/// Device-side credential, exactly what `get_payload` returns
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentPayload {
    pub token_id: String,
    pub dpan: String,
    pub expiry_month: u8,
    pub expiry_year: u16,
    /// Hex-encoded session key for cryptogram generation
    pub session_key: String,
    pub atc: u16,
    pub scheme: Scheme,
    /// Hex-encoded AID of `scheme`
    pub aid: String,
    pub expires_at: DateTime<Utc>,
}

impl PaymentPayload {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// DPAN reduced to its last four digits for logs
    pub fn masked_dpan(&self) -> String {
        mask_pan(&self.dpan)
    }
}

/// `************1234`
pub fn mask_pan(pan: &str) -> String {
    let len = pan.chars().count();
    let hidden = len.saturating_sub(4);
    pan.chars()
        .enumerate()
        .map(|(i, c)| if i < hidden { '*' } else { c })
        .collect()
}

impl fmt::Debug for PaymentPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PaymentPayload")
            .field("token_id", &self.token_id)
            .field("dpan", &self.masked_dpan())
            .field("expiry_month", &self.expiry_month)
            .field("expiry_year", &self.expiry_year)
            .field("session_key", &"<redacted>")
            .field("atc", &self.atc)
            .field("scheme", &self.scheme)
            .field("aid", &self.aid)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl Drop for PaymentPayload {
    fn drop(&mut self) {
        self.dpan.zeroize();
        self.session_key.zeroize();
    }
}

/// Single-slot, last-writer-wins credential holder
#[derive(Default)]
pub struct ActiveTokenSlot {
    current: RwLock<Option<Arc<PaymentPayload>>>,
}

static SHARED_SLOT: OnceCell<Arc<ActiveTokenSlot>> = OnceCell::new();

impl ActiveTokenSlot {
    /// Create an empty slot
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide slot for hosts whose callback context cannot be handed
    /// a slot directly
    pub fn shared() -> Arc<ActiveTokenSlot> {
        SHARED_SLOT.get_or_init(|| Arc::new(ActiveTokenSlot::new())).clone()
    }

    /// Replace the credential; visible to the next `get`
    pub fn set(&self, payload: PaymentPayload) {
        info!(
            "Active token set: {} {} ATC={}",
            payload.scheme,
            payload.masked_dpan(),
            payload.atc
        );
        *self.current.write() = Some(Arc::new(payload));
    }

    /// Wipe the credential
    pub fn clear(&self) {
        if self.current.write().take().is_some() {
            debug!("Active token cleared");
        }
    }

    /// True iff a credential is present
    pub fn is_ready(&self) -> bool {
        self.current.read().is_some()
    }

    /// Snapshot of the current credential
    pub fn get(&self) -> Option<Arc<PaymentPayload>> {
        self.current.read().clone()
    }

    /// Scheme of the current credential, if any
    pub fn scheme(&self) -> Option<Scheme> {
        self.current.read().as_ref().map(|p| p.scheme)
    }
}

impl fmt::Debug for ActiveTokenSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveTokenSlot")
            .field("ready", &self.is_ready())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::Duration;
    use std::thread;

    pub(crate) fn sample_payload(scheme: Scheme, atc: u16) -> PaymentPayload {
        PaymentPayload {
            token_id: "0190c0de-0000-7000-8000-000000000001".to_string(),
            dpan: "4000000000001234".to_string(),
            expiry_month: 2,
            expiry_year: 2028,
            session_key: "00112233445566778899aabbccddeeff".to_string(),
            atc,
            scheme,
            aid: hex::encode_upper(scheme.aid()),
            expires_at: Utc::now() + Duration::minutes(5),
        }
    }

    #[test]
    fn test_empty_slot() {
        let slot = ActiveTokenSlot::new();
        assert!(!slot.is_ready());
        assert!(slot.get().is_none());
        assert!(slot.scheme().is_none());
    }

    #[test]
    fn test_set_get_clear() {
        let slot = ActiveTokenSlot::new();
        slot.set(sample_payload(Scheme::Visa, 1));
        assert!(slot.is_ready());
        assert_eq!(slot.get().unwrap().atc, 1);

        slot.set(sample_payload(Scheme::Mastercard, 2));
        assert_eq!(slot.scheme(), Some(Scheme::Mastercard));
        assert_eq!(slot.get().unwrap().atc, 2);

        slot.clear();
        assert!(!slot.is_ready());
        slot.clear();
    }

    #[test]
    fn test_snapshot_survives_replacement() {
        let slot = ActiveTokenSlot::new();
        slot.set(sample_payload(Scheme::Visa, 1));
        let held = slot.get().unwrap();
        slot.set(sample_payload(Scheme::Mastercard, 9));
        assert_eq!(held.atc, 1);
        assert_eq!(held.scheme, Scheme::Visa);
    }

    #[test]
    fn test_clearing_keeps_held_snapshot_intact() {
        let slot = ActiveTokenSlot::new();
        slot.set(sample_payload(Scheme::Visa, 1));
        let held = slot.get().unwrap();
        let copy = (*held).clone();
        slot.clear();
        drop(copy);
        // the wipe on drop only touches the dropped value
        assert_eq!(held.dpan, "4000000000001234");
        assert_eq!(held.session_key, "00112233445566778899aabbccddeeff");
    }

    #[test]
    fn test_concurrent_readers_see_whole_values() {
        let slot = Arc::new(ActiveTokenSlot::new());
        slot.set(sample_payload(Scheme::Visa, 0));

        let writer = {
            let slot = Arc::clone(&slot);
            thread::spawn(move || {
                for i in 0..500u16 {
                    let scheme = if i % 2 == 0 { Scheme::Visa } else { Scheme::Mastercard };
                    slot.set(sample_payload(scheme, i));
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let slot = Arc::clone(&slot);
                thread::spawn(move || {
                    for _ in 0..500 {
                        if let Some(p) = slot.get() {
                            assert_eq!(p.aid, hex::encode_upper(p.scheme.aid()));
                        }
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for r in readers {
            r.join().unwrap();
        }
    }

    #[test]
    fn test_shared_is_one_instance() {
        assert!(Arc::ptr_eq(&ActiveTokenSlot::shared(), &ActiveTokenSlot::shared()));
    }

    #[test]
    fn test_debug_redacts() {
        let shown = format!("{:?}", sample_payload(Scheme::Visa, 3));
        assert!(shown.contains("************1234"));
        assert!(!shown.contains("4000000000001234"));
        assert!(!shown.contains("00112233445566778899aabbccddeeff"));
    }

    #[test]
    fn test_mask_pan_short() {
        assert_eq!(mask_pan("123"), "123");
        assert_eq!(mask_pan(""), "");
    }

    #[test]
    fn test_expiry() {
        let mut p = sample_payload(Scheme::Visa, 0);
        assert!(!p.is_expired());
        p.expires_at = Utc::now() - Duration::seconds(1);
        assert!(p.is_expired());
        assert!(p.is_expired_at(p.expires_at));
    }
}
