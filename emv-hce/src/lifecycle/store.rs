//! Token persistence
//!
//! [`TokenStore`] is the seam to whatever database backs the issuer service.
//! Two implementations ship: an in-memory map and a JSON file store.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use uuid::Uuid;

use super::token::{TokenRecord, TokenStatus};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Token {0} already exists")]
    Duplicate(Uuid),

    #[error("Token {0} not found")]
    Missing(Uuid),

    #[error("Card {card_id} already has an active token on device {device_fingerprint}")]
    DuplicateActive {
        card_id: String,
        device_fingerprint: String,
    },

    #[error("Token {token_id} cannot go from {from} to {to}")]
    IllegalTransition {
        token_id: Uuid,
        from: TokenStatus,
        to: TokenStatus,
    },

    #[error("Storage I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("Storage format error: {0}")]
    Format(#[from] serde_json::Error),
}

/// Storage for token records
///
/// Records are returned in token id order, which is creation order.
pub trait TokenStore: Send + Sync {
    /// Add a record; at most one ACTIVE record per card and device
    fn insert(&self, record: TokenRecord) -> Result<(), StoreError>;

    /// Replace an existing record; DEACTIVATED is terminal
    fn update(&self, record: &TokenRecord) -> Result<(), StoreError>;

    fn get(&self, token_id: &Uuid) -> Result<Option<TokenRecord>, StoreError>;

    fn all(&self) -> Result<Vec<TokenRecord>, StoreError>;

    fn find_active_by_card_and_device(
        &self,
        card_id: &str,
        device_fingerprint: &str,
    ) -> Result<Vec<TokenRecord>, StoreError> {
        Ok(self
            .all()?
            .into_iter()
            .filter(|t| t.is_active() && t.binds(card_id, device_fingerprint))
            .collect())
    }

    fn find_active_by_card(&self, card_id: &str) -> Result<Vec<TokenRecord>, StoreError> {
        Ok(self
            .all()?
            .into_iter()
            .filter(|t| t.is_active() && t.card_id == card_id)
            .collect())
    }

    fn list_by_user(&self, user_id: &str) -> Result<Vec<TokenRecord>, StoreError> {
        Ok(self.all()?.into_iter().filter(|t| t.user_id == user_id).collect())
    }
}

fn check_insert(
    records: &BTreeMap<Uuid, TokenRecord>,
    record: &TokenRecord,
) -> Result<(), StoreError> {
    if records.contains_key(&record.token_id) {
        return Err(StoreError::Duplicate(record.token_id));
    }
    let taken = record.is_active()
        && records
            .values()
            .any(|t| t.is_active() && t.binds(&record.card_id, &record.device_fingerprint));
    if taken {
        return Err(StoreError::DuplicateActive {
            card_id: record.card_id.clone(),
            device_fingerprint: record.device_fingerprint.clone(),
        });
    }
    Ok(())
}

fn check_transition(existing: &TokenRecord, record: &TokenRecord) -> Result<(), StoreError> {
    if existing.status.can_transition_to(record.status) {
        return Ok(());
    }
    warn!(
        "Refusing {} -> {} for token {}",
        existing.status, record.status, record.token_id
    );
    Err(StoreError::IllegalTransition {
        token_id: record.token_id,
        from: existing.status,
        to: record.status,
    })
}

/// In-process store, lost on restart
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    records: RwLock<BTreeMap<Uuid, TokenRecord>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TokenStore for MemoryTokenStore {
    fn insert(&self, record: TokenRecord) -> Result<(), StoreError> {
        let mut records = self.records.write();
        check_insert(&records, &record)?;
        records.insert(record.token_id, record);
        Ok(())
    }

    fn update(&self, record: &TokenRecord) -> Result<(), StoreError> {
        match self.records.write().get_mut(&record.token_id) {
            Some(slot) => {
                check_transition(slot, record)?;
                *slot = record.clone();
                Ok(())
            }
            None => Err(StoreError::Missing(record.token_id)),
        }
    }

    fn get(&self, token_id: &Uuid) -> Result<Option<TokenRecord>, StoreError> {
        Ok(self.records.read().get(token_id).cloned())
    }

    fn all(&self) -> Result<Vec<TokenRecord>, StoreError> {
        Ok(self.records.read().values().cloned().collect())
    }
}

/// JSON file store: `<storage_dir>/hce_tokens.json`
///
/// The whole map is rewritten on every change through a temp file and rename,
/// so a crash leaves either the old or the new file.
#[derive(Debug)]
pub struct FileTokenStore {
    storage_dir: PathBuf,
    state_file: PathBuf,
    records: Mutex<BTreeMap<Uuid, TokenRecord>>,
}

impl FileTokenStore {
    const DEFAULT_STATE_FILE: &'static str = "hce_tokens.json";

    /// Open the store, loading existing records
    pub fn open(storage_dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let storage_dir = storage_dir.into();
        let state_file = storage_dir.join(Self::DEFAULT_STATE_FILE);
        let records = Self::load(&state_file)?;
        Ok(Self {
            storage_dir,
            state_file,
            records: Mutex::new(records),
        })
    }

    pub fn path(&self) -> &Path {
        &self.state_file
    }

    fn load(state_file: &Path) -> Result<BTreeMap<Uuid, TokenRecord>, StoreError> {
        if !state_file.exists() {
            info!("No existing token store at {:?}, starting empty", state_file);
            return Ok(BTreeMap::new());
        }

        let content = fs::read_to_string(state_file)?;
        let list: Vec<TokenRecord> = serde_json::from_str(&content).map_err(|e| {
            warn!("Failed to parse token store {:?}: {}", state_file, e);
            e
        })?;
        info!("Loaded {} tokens from {:?}", list.len(), state_file);
        Ok(list.into_iter().map(|t| (t.token_id, t)).collect())
    }

    fn ensure_storage_dir(&self) -> io::Result<()> {
        fs::create_dir_all(&self.storage_dir)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = fs::set_permissions(&self.storage_dir, fs::Permissions::from_mode(0o700));
        }
        Ok(())
    }

    /// Owner-only from the moment the file exists
    fn create_private(path: &Path) -> io::Result<fs::File> {
        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let file = options.open(path)?;
        // a stale temp file keeps its old mode through open
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(fs::Permissions::from_mode(0o600))?;
        }
        Ok(file)
    }

    fn save(&self, records: &BTreeMap<Uuid, TokenRecord>) -> Result<(), StoreError> {
        self.ensure_storage_dir()?;

        let list: Vec<&TokenRecord> = records.values().collect();
        let json = serde_json::to_string_pretty(&list)?;

        let tmp = self.state_file.with_extension("json.tmp");
        let mut file = Self::create_private(&tmp)?;
        file.write_all(json.as_bytes())?;
        file.sync_all()?;
        drop(file);
        fs::rename(&tmp, &self.state_file)?;
        debug!("Saved {} tokens to {:?}", list.len(), self.state_file);
        Ok(())
    }
}

impl TokenStore for FileTokenStore {
    fn insert(&self, record: TokenRecord) -> Result<(), StoreError> {
        let mut records = self.records.lock();
        check_insert(&records, &record)?;
        let token_id = record.token_id;
        records.insert(token_id, record);
        if let Err(e) = self.save(&records) {
            records.remove(&token_id);
            return Err(e);
        }
        Ok(())
    }

    fn update(&self, record: &TokenRecord) -> Result<(), StoreError> {
        let mut records = self.records.lock();
        let previous = match records.get_mut(&record.token_id) {
            Some(slot) => {
                check_transition(slot, record)?;
                std::mem::replace(slot, record.clone())
            }
            None => return Err(StoreError::Missing(record.token_id)),
        };
        if let Err(e) = self.save(&records) {
            records.insert(record.token_id, previous);
            return Err(e);
        }
        Ok(())
    }

    fn get(&self, token_id: &Uuid) -> Result<Option<TokenRecord>, StoreError> {
        Ok(self.records.lock().get(token_id).cloned())
    }

    fn all(&self) -> Result<Vec<TokenRecord>, StoreError> {
        Ok(self.records.lock().values().cloned().collect())
    }
}
