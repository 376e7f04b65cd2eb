//! Persisted connection settings

use crate::SyncError;
use parking_lot::Mutex;
use remote::Credentials;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

const CONNECTION_KEY: &[u8] = b"connection";

/// Where the bridge reconnects to on resume
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionSettings {
    pub repo: String,
    pub branch: String,
    #[serde(default)]
    pub credentials: Credentials,
}

/// Key-value store for connection settings
pub trait SettingsStore: Send + Sync + 'static {
    fn load(&self) -> Result<Option<ConnectionSettings>, SyncError>;
    fn save(&self, settings: &ConnectionSettings) -> Result<(), SyncError>;
    fn clear(&self) -> Result<(), SyncError>;
}

/// Settings in a sled tree
pub struct SledSettings {
    tree: sled::Tree,
}

impl SledSettings {
    /// Open or create the settings database at `path`
    pub fn open(path: &Path) -> Result<Self, SyncError> {
        let db = sled::open(path)?;
        let tree = db.open_tree("settings")?;
        Ok(Self { tree })
    }
}

impl SettingsStore for SledSettings {
    fn load(&self) -> Result<Option<ConnectionSettings>, SyncError> {
        match self.tree.get(CONNECTION_KEY)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn save(&self, settings: &ConnectionSettings) -> Result<(), SyncError> {
        let value = serde_json::to_vec(settings)?;
        self.tree.insert(CONNECTION_KEY, value)?;
        self.tree.flush()?;
        debug!("saved connection settings for {}", settings.repo);
        Ok(())
    }

    fn clear(&self) -> Result<(), SyncError> {
        self.tree.remove(CONNECTION_KEY)?;
        self.tree.flush()?;
        Ok(())
    }
}

/// Process-local settings; clones share state
#[derive(Clone, Default)]
pub struct MemorySettings {
    current: Arc<Mutex<Option<ConnectionSettings>>>,
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettingsStore for MemorySettings {
    fn load(&self) -> Result<Option<ConnectionSettings>, SyncError> {
        Ok(self.current.lock().clone())
    }

    fn save(&self, settings: &ConnectionSettings) -> Result<(), SyncError> {
        *self.current.lock() = Some(settings.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), SyncError> {
        *self.current.lock() = None;
        Ok(())
    }
}
