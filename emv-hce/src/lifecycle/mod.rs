//! Server-side token lifecycle
//!
//! Provision, refresh and deactivate credential tokens against a card issuer,
//! persisting them through a [`TokenStore`].

pub mod issuer;
pub mod manager;
pub mod store;
pub mod token;

pub use self::issuer::{CardIssuer, DevCardIssuer, DigitalCard, IssuerCard, IssuerError, SessionKeys};
pub use self::manager::{open_payload, LifecycleError, TokenLifecycleManager};
pub use self::store::{FileTokenStore, MemoryTokenStore, StoreError, TokenStore};
pub use self::token::{
    DeactivationOutcome, ProvisionedToken, RefreshedSession, TokenRecord, TokenStatus,
    TokenSummary,
};
