//! redb-backed durable backend
//!
//! All keys live in a single table mapping the key string to a
//! postcard-serialized [`Value`]. Every mutating command runs in its own
//! write transaction; redb serializes writers, so each command is atomic
//! and durable once it returns.
//!
//! Commands do blocking file I/O on the calling task, commits included.
//! Run the store on a multi-threaded runtime, or wrap heavy callers in
//! `tokio::task::spawn_blocking`, when that latency matters.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use redb::{Database, ReadableTable, TableDefinition, WriteTransaction};
use tracing::{debug, info, instrument};

use super::value::{Value, increment, sort_members};
use super::{KvBackend, SortQuery};
use crate::error::StorageError;

// Key: backend key, Value: postcard-serialized Value
const KEYSPACE: TableDefinition<&str, &[u8]> = TableDefinition::new("keyspace");

fn encode(value: &Value) -> Result<Vec<u8>, StorageError> {
    postcard::to_allocvec(value).map_err(|e| StorageError::serialization(e.to_string()))
}

fn decode(bytes: &[u8]) -> Result<Value, StorageError> {
    Ok(postcard::from_bytes(bytes)?)
}

/// Durable implementation of [`KvBackend`] on a redb database file
pub struct RedbBackend {
    db: Arc<Database>,
    path: PathBuf,
}

impl RedbBackend {
    /// Open or create the database
    #[instrument(skip(path), fields(path = %path.display()))]
    pub fn open(path: PathBuf, cache_size: usize) -> Result<Self, StorageError> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::builder()
            .set_cache_size(cache_size)
            .create(&path)
            .map_err(StorageError::database)?;

        info!("Opened redb backend");

        let backend = Self {
            db: Arc::new(db),
            path,
        };
        backend.init_tables()?;
        Ok(backend)
    }

    /// Path of the database file
    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    fn init_tables(&self) -> Result<(), StorageError> {
        let write_txn = self.db.begin_write().map_err(StorageError::database)?;
        write_txn
            .open_table(KEYSPACE)
            .map_err(StorageError::database)?;
        write_txn.commit().map_err(StorageError::database)?;

        debug!("Initialized redb tables");
        Ok(())
    }

    /// Run `f` against the current value of `key` inside one write transaction
    ///
    /// `f` returns the value to store (`None` deletes the key) and a result.
    fn update<T, F>(&self, key: &str, f: F) -> Result<T, StorageError>
    where
        F: FnOnce(Option<Value>) -> Result<(Option<Value>, T), StorageError>,
    {
        let write_txn = self.db.begin_write().map_err(StorageError::database)?;
        let result = {
            let mut table = write_txn
                .open_table(KEYSPACE)
                .map_err(StorageError::database)?;
            let current = match table.get(key).map_err(StorageError::database)? {
                Some(bytes) => Some(decode(bytes.value())?),
                None => None,
            };
            let (next, result) = f(current)?;
            match next {
                Some(value) => {
                    table
                        .insert(key, encode(&value)?.as_slice())
                        .map_err(StorageError::database)?;
                }
                None => {
                    table.remove(key).map_err(StorageError::database)?;
                }
            }
            result
        };
        write_txn.commit().map_err(StorageError::database)?;
        Ok(result)
    }

    /// Read several values in one read transaction
    fn read_many(&self, keys: &[&str]) -> Result<Vec<Option<Value>>, StorageError> {
        let read_txn = self.db.begin_read().map_err(StorageError::database)?;
        let table = read_txn
            .open_table(KEYSPACE)
            .map_err(StorageError::database)?;
        keys.iter()
            .map(|key| match table.get(*key).map_err(StorageError::database)? {
                Some(bytes) => decode(bytes.value()).map(Some),
                None => Ok(None),
            })
            .collect()
    }

    fn read(&self, key: &str) -> Result<Option<Value>, StorageError> {
        Ok(self.read_many(&[key])?.pop().flatten())
    }

    fn clear_table(write_txn: &WriteTransaction) -> Result<(), StorageError> {
        write_txn
            .delete_table(KEYSPACE)
            .map_err(StorageError::database)?;
        write_txn
            .open_table(KEYSPACE)
            .map_err(StorageError::database)?;
        Ok(())
    }
}

#[async_trait]
impl KvBackend for RedbBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        match self.read(key)? {
            Some(value) => Ok(Some(value.as_str(key)?.to_string())),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.update(key, |_| Ok((Some(Value::Str(value.to_string())), ())))
    }

    async fn incr(&self, key: &str) -> Result<u64, StorageError> {
        self.update(key, |current| {
            let next = increment(key, current.as_ref())?;
            Ok((Some(Value::Str(next.to_string())), next))
        })
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>, StorageError> {
        let keys: Vec<&str> = keys.iter().map(String::as_str).collect();
        Ok(self
            .read_many(&keys)?
            .into_iter()
            .map(|value| match value {
                Some(Value::Str(s)) => Some(s),
                _ => None,
            })
            .collect())
    }

    async fn del(&self, keys: &[String]) -> Result<usize, StorageError> {
        let write_txn = self.db.begin_write().map_err(StorageError::database)?;
        let removed = {
            let mut table = write_txn
                .open_table(KEYSPACE)
                .map_err(StorageError::database)?;
            let mut removed = 0;
            for key in keys {
                if table
                    .remove(key.as_str())
                    .map_err(StorageError::database)?
                    .is_some()
                {
                    removed += 1;
                }
            }
            removed
        };
        write_txn.commit().map_err(StorageError::database)?;
        Ok(removed)
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let read_txn = self.db.begin_read().map_err(StorageError::database)?;
        let table = read_txn
            .open_table(KEYSPACE)
            .map_err(StorageError::database)?;

        let mut results = Vec::new();
        // Use range to get all keys >= prefix
        let range = table.range(prefix..).map_err(StorageError::database)?;
        for entry in range {
            let (key, _) = entry.map_err(StorageError::database)?;
            let key = key.value();
            // Stop when we're past the prefix
            if !key.starts_with(prefix) {
                break;
            }
            results.push(key.to_string());
        }
        Ok(results)
    }

    async fn sadd(&self, key: &str, members: &[String]) -> Result<usize, StorageError> {
        self.update(key, |current| {
            let mut value = current.unwrap_or_else(|| Value::Set(Default::default()));
            let set = value.as_set_mut(key)?;
            let added = members
                .iter()
                .filter(|member| set.insert((*member).clone()))
                .count();
            Ok((Some(value), added))
        })
    }

    async fn srem(&self, key: &str, members: &[String]) -> Result<usize, StorageError> {
        self.update(key, |current| {
            let Some(mut value) = current else {
                return Ok((None, 0));
            };
            let set = value.as_set_mut(key)?;
            let removed = members.iter().filter(|member| set.remove(*member)).count();
            let next = if set.is_empty() { None } else { Some(value) };
            Ok((next, removed))
        })
    }

    async fn sismember(&self, key: &str, member: &str) -> Result<bool, StorageError> {
        match self.read(key)? {
            Some(value) => Ok(value.as_set(key)?.contains(member)),
            None => Ok(false),
        }
    }

    async fn scard(&self, key: &str) -> Result<usize, StorageError> {
        match self.read(key)? {
            Some(value) => Ok(value.as_set(key)?.len()),
            None => Ok(0),
        }
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, StorageError> {
        match self.read(key)? {
            Some(value) => Ok(value.as_set(key)?.iter().cloned().collect()),
            None => Ok(Vec::new()),
        }
    }

    async fn hmget(&self, key: &str, fields: &[&str]) -> Result<Vec<Option<String>>, StorageError> {
        match self.read(key)? {
            Some(value) => {
                let hash = value.as_hash(key)?;
                Ok(fields.iter().map(|f| hash.get(*f).cloned()).collect())
            }
            None => Ok(vec![None; fields.len()]),
        }
    }

    async fn hset(&self, key: &str, fields: &[(String, String)]) -> Result<(), StorageError> {
        self.update(key, |current| {
            let mut value = current.unwrap_or_else(|| Value::Hash(Default::default()));
            let hash = value.as_hash_mut(key)?;
            for (field, v) in fields {
                hash.insert(field.clone(), v.clone());
            }
            Ok((Some(value), ()))
        })
    }

    async fn sort(&self, key: &str, query: &SortQuery) -> Result<Vec<Option<String>>, StorageError> {
        // One read transaction gives the projection a consistent snapshot
        let read_txn = self.db.begin_read().map_err(StorageError::database)?;
        let table = read_txn
            .open_table(KEYSPACE)
            .map_err(StorageError::database)?;

        let members: Vec<String> = match table.get(key).map_err(StorageError::database)? {
            Some(bytes) => decode(bytes.value())?
                .as_set(key)?
                .iter()
                .cloned()
                .collect(),
            None => Vec::new(),
        };

        sort_members(members, query, |hash_key, field| {
            match table.get(hash_key).map_err(StorageError::database)? {
                Some(bytes) => Ok(decode(bytes.value())?.hash_field(field)),
                None => Ok(None),
            }
        })
    }

    async fn flush(&self) -> Result<(), StorageError> {
        let write_txn = self.db.begin_write().map_err(StorageError::database)?;
        Self::clear_table(&write_txn)?;
        write_txn.commit().map_err(StorageError::database)?;
        debug!(path = %self.path.display(), "Flushed redb backend");
        Ok(())
    }
}
