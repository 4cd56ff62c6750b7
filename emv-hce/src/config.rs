//! Configuration
//!
//! Server-side settings come from the environment:
//!
//! | Variable | Meaning | Default |
//! |---|---|---|
//! | `HCE_SESSION_KEY_TTL_SECS` | session key validity window | 300 |
//! | `HCE_STORAGE_DIR` | token store directory | `~/.emv-hce`, else `/var/lib/emv-hce` |
//! | `HCE_ENCRYPTION_KEY` | at-rest key, 64 hex chars | random per process |

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use log::warn;
use thiserror::Error;

use crate::crypto::{AtRestCipher, CryptoError};

pub const ENV_SESSION_KEY_TTL: &str = "HCE_SESSION_KEY_TTL_SECS";
pub const ENV_STORAGE_DIR: &str = "HCE_STORAGE_DIR";
pub const ENV_ENCRYPTION_KEY: &str = "HCE_ENCRYPTION_KEY";

const DEFAULT_SESSION_KEY_TTL_SECS: u64 = 300;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var} has invalid value {value:?}")]
    InvalidValue { var: &'static str, value: String },
}

/// Settings for the token lifecycle manager and its store
#[derive(Clone)]
pub struct LifecycleConfig {
    /// How long a session key (and so a delivered payload) stays usable
    pub session_key_ttl: Duration,
    pub storage_dir: PathBuf,
    /// Hex key for at-rest encryption of DPANs and session keys
    pub encryption_key: Option<String>,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            session_key_ttl: Duration::from_secs(DEFAULT_SESSION_KEY_TTL_SECS),
            storage_dir: default_storage_dir(),
            encryption_key: None,
        }
    }
}

impl LifecycleConfig {
    /// Read from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Read through `lookup`, falling back to defaults for unset variables
    pub fn from_vars<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let session_key_ttl = match lookup(ENV_SESSION_KEY_TTL) {
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => Duration::from_secs(secs),
                _ => {
                    return Err(ConfigError::InvalidValue {
                        var: ENV_SESSION_KEY_TTL,
                        value: raw,
                    })
                }
            },
            None => Duration::from_secs(DEFAULT_SESSION_KEY_TTL_SECS),
        };

        let storage_dir = lookup(ENV_STORAGE_DIR)
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(default_home_storage_dir);

        let encryption_key = lookup(ENV_ENCRYPTION_KEY).filter(|s| !s.is_empty());

        Ok(Self {
            session_key_ttl,
            storage_dir,
            encryption_key,
        })
    }

    pub fn with_storage_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.storage_dir = dir.into();
        self
    }

    pub fn with_session_key_ttl(mut self, ttl: Duration) -> Self {
        self.session_key_ttl = ttl;
        self
    }

    /// TTL as a chrono duration for timestamp arithmetic
    pub fn session_key_ttl_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.session_key_ttl)
            .unwrap_or_else(|_| chrono::Duration::seconds(DEFAULT_SESSION_KEY_TTL_SECS as i64))
    }

    /// Build the at-rest cipher from the configured key
    ///
    /// Without a key a random one is used, so stored tokens cannot be read
    /// after a restart.
    pub fn at_rest_cipher(&self) -> Result<AtRestCipher, CryptoError> {
        match &self.encryption_key {
            Some(key) => AtRestCipher::from_hex(key),
            None => {
                warn!("{} not set, using an ephemeral at-rest key", ENV_ENCRYPTION_KEY);
                Ok(AtRestCipher::ephemeral())
            }
        }
    }
}

impl fmt::Debug for LifecycleConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleConfig")
            .field("session_key_ttl", &self.session_key_ttl)
            .field("storage_dir", &self.storage_dir)
            .field("encryption_key", &self.encryption_key.as_ref().map(|_| "<set>"))
            .finish()
    }
}

/// Default storage directory, honouring `HCE_STORAGE_DIR`
pub fn default_storage_dir() -> PathBuf {
    if let Ok(path) = std::env::var(ENV_STORAGE_DIR) {
        if !path.is_empty() {
            return PathBuf::from(path);
        }
    }
    default_home_storage_dir()
}

fn default_home_storage_dir() -> PathBuf {
    if let Some(home) = dirs::home_dir() {
        return home.join(".emv-hce");
    }
    PathBuf::from("/var/lib/emv-hce")
}

/// Settings for the on-device responder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponderConfig {
    /// Application label advertised in the PPSE directory
    pub app_label: String,
    /// Refuse GPO/READ RECORD/GENERATE AC once the credential's `expires_at` passed
    pub reject_expired: bool,
}

impl Default for ResponderConfig {
    fn default() -> Self {
        Self {
            app_label: "EU Pay".to_string(),
            reject_expired: true,
        }
    }
}
