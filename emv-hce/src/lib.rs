//! Tokenized EMV payments over host card emulation
//!
//! Two halves share this crate:
//!
//! - On the device, [`emv::PaymentResponder`] answers a contactless
//!   terminal's APDUs from the credential in an [`emv::ActiveTokenSlot`],
//!   computing an ARQC for each tap.
//! - On the server, [`lifecycle::TokenLifecycleManager`] provisions,
//!   refreshes and revokes those credentials and delivers them to the
//!   device inside an RSA/AES-GCM envelope.
//!
//! Between them sit the BER-TLV codec, the APDU parser and the crypto
//! primitives.

pub mod apdu;
pub mod config;
pub mod crypto;
pub mod emv;
pub mod lifecycle;
pub mod tlv;

pub use apdu::{parse_apdu, Response, APDU, SW};
pub use config::{LifecycleConfig, ResponderConfig};
pub use emv::{ActiveTokenSlot, PaymentPayload, PaymentResponder, Scheme, TapError};
pub use lifecycle::{CardIssuer, LifecycleError, TokenLifecycleManager, TokenStore};
