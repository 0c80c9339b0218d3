//! Redis backend
//!
//! Commands map one to one onto Redis. The `ConnectionManager` reconnects
//! on its own; this layer adds no retries on top of it.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, Cmd};
use tracing::{debug, info, instrument};

use super::{KvBackend, SortQuery};
use crate::error::StorageError;

/// [`KvBackend`] over a Redis server
#[derive(Clone)]
pub struct RedisBackend {
    conn: ConnectionManager,
}

impl RedisBackend {
    /// Connect to the server at `url` (e.g. `redis://127.0.0.1:6379/6`)
    #[instrument(skip_all)]
    pub async fn connect(url: &str) -> Result<Self, StorageError> {
        let client = Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        info!("Connected to redis backend");
        Ok(Self { conn })
    }

    async fn query<T: redis::FromRedisValue>(&self, cmd: &Cmd) -> Result<T, StorageError> {
        let mut conn = self.conn.clone();
        let value: T = cmd.query_async(&mut conn).await?;
        Ok(value)
    }
}

/// Escape glob metacharacters so `prefix` matches literally in `KEYS`
fn glob_escape(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('*');
    escaped
}

/// `SORT key BY .. [LIMIT offset count] GET .. [DESC] [ALPHA]`
fn sort_cmd(key: &str, query: &SortQuery) -> Cmd {
    let mut cmd = redis::cmd("SORT");
    cmd.arg(key).arg("BY").arg(query.by.pattern());
    if query.offset > 0 || query.count != usize::MAX {
        let count = i64::try_from(query.count).unwrap_or(-1);
        cmd.arg("LIMIT").arg(query.offset).arg(count);
    }
    for field in &query.get {
        cmd.arg("GET").arg(field.pattern());
    }
    if query.descending {
        cmd.arg("DESC");
    }
    if query.alpha {
        cmd.arg("ALPHA");
    }
    cmd
}

#[async_trait]
impl KvBackend for RedisBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.query(redis::cmd("GET").arg(key)).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.query(redis::cmd("SET").arg(key).arg(value)).await
    }

    async fn incr(&self, key: &str) -> Result<u64, StorageError> {
        self.query(redis::cmd("INCR").arg(key)).await
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>, StorageError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        self.query(redis::cmd("MGET").arg(keys)).await
    }

    async fn del(&self, keys: &[String]) -> Result<usize, StorageError> {
        if keys.is_empty() {
            return Ok(0);
        }
        self.query(redis::cmd("DEL").arg(keys)).await
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        self.query(redis::cmd("KEYS").arg(glob_escape(prefix))).await
    }

    async fn sadd(&self, key: &str, members: &[String]) -> Result<usize, StorageError> {
        if members.is_empty() {
            return Ok(0);
        }
        self.query(redis::cmd("SADD").arg(key).arg(members)).await
    }

    async fn srem(&self, key: &str, members: &[String]) -> Result<usize, StorageError> {
        if members.is_empty() {
            return Ok(0);
        }
        self.query(redis::cmd("SREM").arg(key).arg(members)).await
    }

    async fn sismember(&self, key: &str, member: &str) -> Result<bool, StorageError> {
        self.query(redis::cmd("SISMEMBER").arg(key).arg(member)).await
    }

    async fn scard(&self, key: &str) -> Result<usize, StorageError> {
        self.query(redis::cmd("SCARD").arg(key)).await
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, StorageError> {
        self.query(redis::cmd("SMEMBERS").arg(key)).await
    }

    async fn hmget(&self, key: &str, fields: &[&str]) -> Result<Vec<Option<String>>, StorageError> {
        if fields.is_empty() {
            return Ok(Vec::new());
        }
        self.query(redis::cmd("HMGET").arg(key).arg(fields)).await
    }

    async fn hset(&self, key: &str, fields: &[(String, String)]) -> Result<(), StorageError> {
        if fields.is_empty() {
            return Ok(());
        }
        let mut cmd = redis::cmd("HSET");
        cmd.arg(key);
        for (field, value) in fields {
            cmd.arg(field).arg(value);
        }
        let _: usize = self.query(&cmd).await?;
        Ok(())
    }

    async fn sort(&self, key: &str, query: &SortQuery) -> Result<Vec<Option<String>>, StorageError> {
        self.query(&sort_cmd(key, query)).await
    }

    async fn flush(&self) -> Result<(), StorageError> {
        self.query::<()>(&redis::cmd("FLUSHDB")).await?;
        debug!("Flushed redis database");
        Ok(())
    }
}
