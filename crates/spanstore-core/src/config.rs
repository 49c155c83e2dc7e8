use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

/// When the store asks the medium to make writes durable.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Sync after the new index block is written and again after the
    /// selector flip, so a commit that returns is on stable storage.
    #[default]
    EveryCommit,
    /// Issue plain writes and leave flushing to the OS.
    OsDefault,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub sync_mode: SyncMode,
    /// On open, fall back to the other pointer slot if the authoritative
    /// index block is unreadable.
    pub recover_from_shadow: bool,
    /// Shrink the medium to the high-water mark after a pack.
    pub truncate_on_pack: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            sync_mode: SyncMode::EveryCommit,
            recover_from_shadow: true,
            truncate_on_pack: true,
        }
    }
}

impl StoreConfig {
    pub fn from_toml_str(s: &str) -> StoreResult<Self> {
        toml::from_str(s).map_err(|e| StoreError::Config(e.to_string()))
    }

    pub fn load(path: impl AsRef<Path>) -> StoreResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> StoreResult<String> {
        toml::to_string(self).map_err(|e| StoreError::Config(e.to_string()))
    }
}
