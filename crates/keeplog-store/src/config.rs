//! Store configuration
//!
//! Loaded from TOML:
//!
//! ```toml
//! namespace = "app"
//!
//! [backend]
//! kind = "redb"
//! path = "./data/keeplog.redb"
//! cache_size = 67108864
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::StorageError;

/// Default cache size for the redb backend
pub const DEFAULT_CACHE_SIZE: usize = 64 * 1024 * 1024; // 64MB

fn default_db_path() -> PathBuf {
    PathBuf::from("./data/keeplog.redb")
}

fn default_cache_size() -> usize {
    DEFAULT_CACHE_SIZE
}

/// Which backend the store runs on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BackendConfig {
    /// In-process, lost on exit
    Memory,
    /// Single-file durable storage
    Redb {
        #[serde(default = "default_db_path")]
        path: PathBuf,
        #[serde(default = "default_cache_size")]
        cache_size: usize,
    },
    /// Redis server (requires the `redis` feature)
    Redis { url: String },
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self::Redb {
            path: default_db_path(),
            cache_size: DEFAULT_CACHE_SIZE,
        }
    }
}

/// Configuration for a [`LogStore`](crate::LogStore)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Prefix for every key, lets several stores share one backend
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub backend: BackendConfig,
}

impl StoreConfig {
    /// In-memory store, mostly for tests
    pub fn memory() -> Self {
        Self {
            namespace: None,
            backend: BackendConfig::Memory,
        }
    }

    /// redb store at `path` with the default cache size
    pub fn redb(path: impl Into<PathBuf>) -> Self {
        Self {
            namespace: None,
            backend: BackendConfig::Redb {
                path: path.into(),
                cache_size: DEFAULT_CACHE_SIZE,
            },
        }
    }

    /// Set the key namespace
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Parse from a TOML document
    pub fn from_toml_str(text: &str) -> Result<Self, StorageError> {
        toml::from_str(text).map_err(|e| StorageError::config(e.to_string()))
    }

    /// Load from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }
}
