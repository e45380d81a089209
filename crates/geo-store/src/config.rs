use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::device::DeviceProfile;

/// File name of the database inside the data directory.
pub const DB_FILE_NAME: &str = "geo-storage.db";

/// How a bundle import commits its writes.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ImportMode {
    /// One transaction for the whole bundle; a failure leaves the store untouched.
    #[default]
    Atomic,
    /// One transaction per record; records written before a failure stay.
    Incremental,
}

/// Store configuration, usually read from the `store` section of `config.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding the database. Falls back to `$HOME/.geo`.
    pub data_dir: Option<PathBuf>,
    /// Keep everything in memory (tests, ephemeral sessions)
    pub in_memory: bool,
    /// Default page size for conversation listings
    pub conversation_list_limit: usize,
    /// Default page size for history listings
    pub history_list_limit: usize,
    pub import_mode: ImportMode,
    /// Device characteristics to use instead of probing the environment
    pub device: Option<DeviceProfile>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            in_memory: false,
            conversation_list_limit: 10,
            history_list_limit: 50,
            import_mode: ImportMode::Atomic,
            device: None,
        }
    }
}

/// Where the database lives once the configuration is resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    File(PathBuf),
    Memory,
    Unavailable(String),
}

impl StoreConfig {
    pub fn in_memory() -> Self {
        Self {
            in_memory: true,
            ..Self::default()
        }
    }

    pub fn at(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: Some(data_dir.into()),
            ..Self::default()
        }
    }

    pub fn location(&self) -> StoreLocation {
        if self.in_memory {
            return StoreLocation::Memory;
        }
        if let Some(dir) = &self.data_dir {
            return StoreLocation::File(dir.join(DB_FILE_NAME));
        }
        match std::env::var_os("HOME") {
            Some(home) if !home.is_empty() => {
                StoreLocation::File(PathBuf::from(home).join(".geo").join(DB_FILE_NAME))
            }
            _ => StoreLocation::Unavailable("no data directory and HOME is not set".into()),
        }
    }
}
