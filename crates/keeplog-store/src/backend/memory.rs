//! In-memory backend
//!
//! Suitable for testing and simulation environments. Single-key commands
//! go through `DashMap`'s entry API, which makes them atomic per key.

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry as MapEntry;
use tracing::{debug, trace};

use super::value::{Value, increment, sort_members};
use super::{KvBackend, SortQuery};
use crate::error::StorageError;

/// In-memory implementation of [`KvBackend`]
#[derive(Debug, Default)]
pub struct MemoryBackend {
    data: DashMap<String, Value>,
}

impl MemoryBackend {
    /// Create a new empty backend
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
        }
    }

    /// Number of keys currently stored
    pub fn key_count(&self) -> usize {
        self.data.len()
    }

    /// Check if no keys are stored
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[async_trait]
impl KvBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        match self.data.get(key) {
            Some(value) => Ok(Some(value.as_str(key)?.to_string())),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.data.insert(key.to_string(), Value::Str(value.to_string()));
        Ok(())
    }

    async fn incr(&self, key: &str) -> Result<u64, StorageError> {
        match self.data.entry(key.to_string()) {
            MapEntry::Occupied(mut occupied) => {
                let next = increment(key, Some(occupied.get()))?;
                occupied.insert(Value::Str(next.to_string()));
                Ok(next)
            }
            MapEntry::Vacant(vacant) => {
                vacant.insert(Value::Str("1".to_string()));
                Ok(1)
            }
        }
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>, StorageError> {
        // Keys holding other kinds read as missing
        Ok(keys
            .iter()
            .map(|key| match self.data.get(key).as_deref() {
                Some(Value::Str(s)) => Some(s.clone()),
                _ => None,
            })
            .collect())
    }

    async fn del(&self, keys: &[String]) -> Result<usize, StorageError> {
        let removed = keys
            .iter()
            .filter(|key| self.data.remove(key.as_str()).is_some())
            .count();
        trace!(requested = keys.len(), removed, "Deleted keys");
        Ok(removed)
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        Ok(self
            .data
            .iter()
            .filter(|item| item.key().starts_with(prefix))
            .map(|item| item.key().clone())
            .collect())
    }

    async fn sadd(&self, key: &str, members: &[String]) -> Result<usize, StorageError> {
        let mut entry = self
            .data
            .entry(key.to_string())
            .or_insert_with(|| Value::Set(Default::default()));
        let set = entry.value_mut().as_set_mut(key)?;
        Ok(members
            .iter()
            .filter(|member| set.insert((*member).clone()))
            .count())
    }

    async fn srem(&self, key: &str, members: &[String]) -> Result<usize, StorageError> {
        let MapEntry::Occupied(mut occupied) = self.data.entry(key.to_string()) else {
            return Ok(0);
        };
        let set = occupied.get_mut().as_set_mut(key)?;
        let removed = members.iter().filter(|member| set.remove(*member)).count();
        if set.is_empty() {
            occupied.remove();
        }
        Ok(removed)
    }

    async fn sismember(&self, key: &str, member: &str) -> Result<bool, StorageError> {
        match self.data.get(key) {
            Some(value) => Ok(value.as_set(key)?.contains(member)),
            None => Ok(false),
        }
    }

    async fn scard(&self, key: &str) -> Result<usize, StorageError> {
        match self.data.get(key) {
            Some(value) => Ok(value.as_set(key)?.len()),
            None => Ok(0),
        }
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, StorageError> {
        match self.data.get(key) {
            Some(value) => Ok(value.as_set(key)?.iter().cloned().collect()),
            None => Ok(Vec::new()),
        }
    }

    async fn hmget(&self, key: &str, fields: &[&str]) -> Result<Vec<Option<String>>, StorageError> {
        match self.data.get(key) {
            Some(value) => {
                let hash = value.as_hash(key)?;
                Ok(fields.iter().map(|f| hash.get(*f).cloned()).collect())
            }
            None => Ok(vec![None; fields.len()]),
        }
    }

    async fn hset(&self, key: &str, fields: &[(String, String)]) -> Result<(), StorageError> {
        let mut entry = self
            .data
            .entry(key.to_string())
            .or_insert_with(|| Value::Hash(Default::default()));
        let hash = entry.value_mut().as_hash_mut(key)?;
        for (field, value) in fields {
            hash.insert(field.clone(), value.clone());
        }
        Ok(())
    }

    async fn sort(&self, key: &str, query: &SortQuery) -> Result<Vec<Option<String>>, StorageError> {
        let members = self.smembers(key).await?;
        sort_members(members, query, |hash_key, field| {
            Ok(self
                .data
                .get(hash_key)
                .and_then(|value| value.hash_field(field)))
        })
    }

    async fn flush(&self) -> Result<(), StorageError> {
        self.data.clear();
        debug!("Flushed in-memory backend");
        Ok(())
    }
}
