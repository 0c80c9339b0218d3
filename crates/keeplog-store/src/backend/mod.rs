//! Key-value/set backends
//!
//! [`KvBackend`] is the command set the store needs from its substrate:
//! string keys with atomic increment, sets whose add reports new members,
//! hashes, multi-key delete and a `SORT ... BY ... GET ...` projection.
//! Nothing here spans several keys atomically.
//!
//! - [`MemoryBackend`]: in-process, for tests and simulation
//! - [`RedbBackend`]: single-file durable storage on redb
//! - `RedisBackend`: a Redis server (feature `redis`)

mod disk;
mod memory;
#[cfg(feature = "redis")]
mod remote;
mod value;

pub use disk::RedbBackend;
pub use memory::MemoryBackend;
#[cfg(feature = "redis")]
pub use remote::RedisBackend;
pub use value::Value;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::BackendConfig;
use crate::error::StorageError;

/// Reference to a hash field of a per-member key: `{key_prefix}{member}->{field}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashField {
    pub key_prefix: String,
    pub field: String,
}

impl HashField {
    pub fn new(key_prefix: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            key_prefix: key_prefix.into(),
            field: field.into(),
        }
    }

    /// Redis pattern form, e.g. `logs|*->added`
    pub fn pattern(&self) -> String {
        format!("{}*->{}", self.key_prefix, self.field)
    }

    /// Key holding the hash for a set member
    pub fn key_for(&self, member: &str) -> String {
        format!("{}{}", self.key_prefix, member)
    }
}

/// Sorted projection over a set
///
/// Members are ordered by an external hash field, windowed, and each
/// surviving member contributes one value per `get` field, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortQuery {
    pub by: HashField,
    pub get: Vec<HashField>,
    pub offset: usize,
    pub count: usize,
    pub descending: bool,
    pub alpha: bool,
}

impl SortQuery {
    /// Ascending numeric sort with no window
    pub fn by(by: HashField) -> Self {
        Self {
            by,
            get: Vec::new(),
            offset: 0,
            count: usize::MAX,
            descending: false,
            alpha: false,
        }
    }

    pub fn get(mut self, field: HashField) -> Self {
        self.get.push(field);
        self
    }

    pub fn limit(mut self, offset: usize, count: usize) -> Self {
        self.offset = offset;
        self.count = count;
        self
    }

    pub fn descending(mut self) -> Self {
        self.descending = true;
        self
    }

    pub fn alpha(mut self, alpha: bool) -> Self {
        self.alpha = alpha;
        self
    }
}

/// Command set required from the backing store
///
/// Each command is atomic on its own key. Composite store operations issue
/// several commands without a surrounding transaction.
#[async_trait]
pub trait KvBackend: Send + Sync {
    /// Read a string key
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Write a string key
    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Atomically increment a counter and return the new value
    ///
    /// A missing key counts as 0, so the first call returns 1.
    async fn incr(&self, key: &str) -> Result<u64, StorageError>;

    /// Read several string keys
    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>, StorageError>;

    /// Delete keys, returning how many existed
    async fn del(&self, keys: &[String]) -> Result<usize, StorageError>;

    /// List keys starting with `prefix`
    async fn keys(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

    /// Add members to a set, returning how many were not already present
    async fn sadd(&self, key: &str, members: &[String]) -> Result<usize, StorageError>;

    /// Remove members from a set, returning how many were present
    ///
    /// A set left empty is deleted.
    async fn srem(&self, key: &str, members: &[String]) -> Result<usize, StorageError>;

    /// Set membership test
    async fn sismember(&self, key: &str, member: &str) -> Result<bool, StorageError>;

    /// Set cardinality, 0 for a missing key
    async fn scard(&self, key: &str) -> Result<usize, StorageError>;

    /// All members of a set
    async fn smembers(&self, key: &str) -> Result<Vec<String>, StorageError>;

    /// Read several hash fields
    async fn hmget(&self, key: &str, fields: &[&str]) -> Result<Vec<Option<String>>, StorageError>;

    /// Write several hash fields
    async fn hset(&self, key: &str, fields: &[(String, String)]) -> Result<(), StorageError>;

    /// Sorted projection over the set at `key`
    ///
    /// Returns `query.get.len()` values per member in sort order; a missing
    /// hash or field yields `None` in its slot.
    async fn sort(&self, key: &str, query: &SortQuery) -> Result<Vec<Option<String>>, StorageError>;

    /// Remove every key
    async fn flush(&self) -> Result<(), StorageError>;
}

/// Open the backend described by `config`
pub async fn open_backend(config: &BackendConfig) -> Result<Arc<dyn KvBackend>, StorageError> {
    match config {
        BackendConfig::Memory => Ok(Arc::new(MemoryBackend::new())),
        BackendConfig::Redb { path, cache_size } => {
            Ok(Arc::new(RedbBackend::open(path.clone(), *cache_size)?))
        }
        #[cfg(feature = "redis")]
        BackendConfig::Redis { url } => Ok(Arc::new(RedisBackend::connect(url).await?)),
        #[cfg(not(feature = "redis"))]
        BackendConfig::Redis { .. } => Err(StorageError::config(
            "redis backend requested but keeplog-store was built without the `redis` feature",
        )),
    }
}
