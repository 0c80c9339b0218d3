//! The log store
//!
//! [`LogStore`] keeps entries in five structures on the backend (see
//! [`keys`](crate::keys)): the identity index, the sequencer, the entry
//! table, the position index and the reason index. Multi-key operations
//! are issued as concurrent batches of single-key commands. A crash in the
//! middle of one can leave, for example, an id in the identity index with
//! no entry row; every read path treats such partial rows as absent.

use std::sync::Arc;

use tracing::{debug, instrument, trace, warn};

use crate::backend::{KvBackend, open_backend};
use crate::config::StoreConfig;
use crate::error::StorageError;
use crate::keys::Keyspace;
use crate::model::{Action, Entry, EntryId, Meta, MetaDiff, SyncCursor, SyncUpdate};

pub(crate) const FIELD_ACTION: &str = "action";
pub(crate) const FIELD_META: &str = "meta";
pub(crate) const FIELD_TIME: &str = "time";
pub(crate) const FIELD_CREATED: &str = "created";
pub(crate) const FIELD_ADDED: &str = "added";

const FIELD_SENT: &str = "sent";
const FIELD_RECEIVED: &str = "received";

/// Parse a stored position
pub(crate) fn parse_added(raw: &str) -> Result<u64, StorageError> {
    raw.trim()
        .parse()
        .map_err(|_| StorageError::deserialization(format!("invalid position {raw:?}")))
}

/// Decode an entry row, attaching `added` when known
pub(crate) fn decode_entry(
    action: &str,
    meta: &str,
    added: Option<u64>,
) -> Result<Entry, StorageError> {
    let action: Action = serde_json::from_str(action)?;
    let mut meta: Meta = serde_json::from_str(meta)?;
    meta.added = added;
    Ok((action, meta))
}

/// Reference-counted log store over a [`KvBackend`]
///
/// Cheap to clone; clones share the backend handle. Holds no other state,
/// so any number of instances may talk to the same backend.
#[derive(Clone)]
pub struct LogStore {
    pub(crate) backend: Arc<dyn KvBackend>,
    pub(crate) keys: Keyspace,
}

impl std::fmt::Debug for LogStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogStore")
            .field("namespace", &self.keys.prefix())
            .finish_non_exhaustive()
    }
}

impl LogStore {
    /// Create a store over an existing backend
    pub fn new(backend: Arc<dyn KvBackend>) -> Self {
        Self {
            backend,
            keys: Keyspace::default(),
        }
    }

    /// Create a store whose keys live under `namespace`
    ///
    /// Fails with [`StorageError::Config`] when `namespace` contains `:`.
    pub fn with_namespace(
        backend: Arc<dyn KvBackend>,
        namespace: &str,
    ) -> Result<Self, StorageError> {
        Ok(Self {
            backend,
            keys: Keyspace::new(Some(namespace))?,
        })
    }

    /// Open the backend described by `config` and wrap it
    pub async fn open(config: &StoreConfig) -> Result<Self, StorageError> {
        let keys = Keyspace::new(config.namespace.as_deref())?;
        let backend = open_backend(&config.backend).await?;
        Ok(Self { backend, keys })
    }

    /// The backend this store runs on
    pub fn backend(&self) -> &Arc<dyn KvBackend> {
        &self.backend
    }

    /// Admit an entry
    ///
    /// Returns the metadata with `added` attached, or `None` when an entry
    /// with the same id was admitted before. The identity index insert is
    /// the only deduplication gate: a duplicate has no side effects.
    #[instrument(skip(self, action, meta), fields(id = %meta.id))]
    pub async fn add(&self, action: Action, meta: Meta) -> Result<Option<Meta>, StorageError> {
        let log_id = meta.id.to_string();
        let mut meta = meta;
        meta.added = None;

        // Serialize up front so a bad payload leaves nothing behind
        let action_json = serde_json::to_string(&action)?;
        let meta_json = serde_json::to_string(&meta)?;

        let inserted = self
            .backend
            .sadd(&self.keys.log_ids(), std::slice::from_ref(&log_id))
            .await?;
        if inserted == 0 {
            debug!("Duplicate entry id, not admitted");
            return Ok(None);
        }

        let added = self.backend.incr(&self.keys.sequencer()).await?;

        let row = [
            (FIELD_ACTION.to_string(), action_json),
            (FIELD_META.to_string(), meta_json),
            (FIELD_TIME.to_string(), meta.time.to_string()),
            (FIELD_CREATED.to_string(), meta.created_key()),
            (FIELD_ADDED.to_string(), added.to_string()),
        ];
        let entry_key = self.keys.entry(&log_id);
        let position_key = self.keys.position(added);
        let (row_written, position_written) = tokio::join!(
            self.backend.hset(&entry_key, &row),
            self.backend.set(&position_key, &log_id),
        );
        row_written?;
        position_written?;

        if !meta.reasons.is_empty() {
            self.backend
                .sadd(&self.keys.reasons(added), &meta.reasons)
                .await?;
        }

        trace!(added, reasons = meta.reasons.len(), "Admitted entry");
        meta.added = Some(added);
        Ok(Some(meta))
    }

    /// Existence check
    ///
    /// Not implemented by this store: always `None` ("unknown"). Use
    /// [`by_id`](Self::by_id) when an answer is required.
    pub async fn has(&self, _id: &EntryId) -> Result<Option<bool>, StorageError> {
        Ok(None)
    }

    /// Look up an entry by id
    pub async fn by_id(&self, id: &EntryId) -> Result<Option<Entry>, StorageError> {
        let row = self
            .backend
            .hmget(
                &self.keys.entry(&id.to_string()),
                &[FIELD_ACTION, FIELD_META, FIELD_ADDED],
            )
            .await?;
        match row.as_slice() {
            [Some(action), Some(meta), added] => {
                let added = added.as_deref().map(parse_added).transpose()?;
                decode_entry(action, meta, added).map(Some)
            }
            _ => Ok(None),
        }
    }

    /// Delete an entry by id
    ///
    /// Returns the removed entry with `added` attached, or `None` for an
    /// unknown id (nothing is touched then).
    #[instrument(skip(self), fields(id = %id))]
    pub async fn remove(&self, id: &EntryId) -> Result<Option<Entry>, StorageError> {
        let log_id = id.to_string();
        let row = self
            .backend
            .hmget(
                &self.keys.entry(&log_id),
                &[FIELD_ADDED, FIELD_ACTION, FIELD_META],
            )
            .await?;
        let [Some(added), Some(action), Some(meta)] = row.as_slice() else {
            return Ok(None);
        };
        let added = parse_added(added)?;
        let entry = decode_entry(action, meta, Some(added))?;

        self.delete_entry(&log_id, added).await?;
        debug!(added, "Removed entry");
        Ok(Some(entry))
    }

    /// Delete every structure of one entry as a single concurrent batch
    pub(crate) async fn delete_entry(&self, log_id: &str, added: u64) -> Result<(), StorageError> {
        let keys = [
            self.keys.entry(log_id),
            self.keys.reasons(added),
            self.keys.position(added),
        ];
        let ids = [log_id.to_string()];
        let ids_key = self.keys.log_ids();
        let (deleted, unregistered) = tokio::join!(
            self.backend.del(&keys),
            self.backend.srem(&ids_key, &ids),
        );
        deleted?;
        unregistered?;
        Ok(())
    }

    /// Merge `diff` into an entry's metadata
    ///
    /// Returns `false` for an unknown id. Reasons named in the diff are added
    /// to the reason index; this never removes a reason from the index, and
    /// sweeps go by the index rather than the meta's reason list.
    #[instrument(skip(self, diff), fields(id = %id))]
    pub async fn change_meta(&self, id: &EntryId, diff: MetaDiff) -> Result<bool, StorageError> {
        let entry_key = self.keys.entry(&id.to_string());
        let row = self
            .backend
            .hmget(&entry_key, &[FIELD_META, FIELD_ADDED])
            .await?;
        let [Some(meta), Some(added)] = row.as_slice() else {
            return Ok(false);
        };
        let added = parse_added(added)?;
        let mut meta: Meta = serde_json::from_str(meta)?;
        meta.apply(&diff);

        let meta_json = serde_json::to_string(&meta)?;
        self.backend
            .hset(&entry_key, &[(FIELD_META.to_string(), meta_json)])
            .await?;

        if let Some(reasons) = diff.reasons.as_ref().filter(|r| !r.is_empty()) {
            self.backend
                .sadd(&self.keys.reasons(added), reasons)
                .await?;
        }
        trace!(added, "Changed entry metadata");
        Ok(true)
    }

    /// Current sequencer value, 0 before the first admission
    pub async fn last_added(&self) -> Result<u64, StorageError> {
        match self.backend.get(&self.keys.sequencer()).await? {
            Some(raw) => parse_added(&raw),
            None => Ok(0),
        }
    }

    /// Number of live entry ids
    pub async fn count(&self) -> Result<usize, StorageError> {
        self.backend.scard(&self.keys.log_ids()).await
    }

    /// Peer synchronization watermarks, unset fields read as 0
    pub async fn last_synced(&self) -> Result<SyncCursor, StorageError> {
        let values = self
            .backend
            .hmget(&self.keys.last_synced(), &[FIELD_SENT, FIELD_RECEIVED])
            .await?;
        let read = |value: Option<&String>| -> Result<u64, StorageError> {
            match value {
                Some(raw) => parse_added(raw),
                None => Ok(0),
            }
        };
        Ok(SyncCursor {
            sent: read(values.first().and_then(Option::as_ref))?,
            received: read(values.get(1).and_then(Option::as_ref))?,
        })
    }

    /// Write the given watermarks and return the full cursor
    pub async fn set_last_synced(&self, update: SyncUpdate) -> Result<SyncCursor, StorageError> {
        let mut fields = Vec::with_capacity(2);
        if let Some(sent) = update.sent {
            fields.push((FIELD_SENT.to_string(), sent.to_string()));
        }
        if let Some(received) = update.received {
            fields.push((FIELD_RECEIVED.to_string(), received.to_string()));
        }
        if !fields.is_empty() {
            self.backend
                .hset(&self.keys.last_synced(), &fields)
                .await?;
        }
        self.last_synced().await
    }

    /// Wipe all store state
    ///
    /// With a namespace only that namespace's keys are deleted; without one
    /// the whole backend is flushed.
    #[instrument(skip(self))]
    pub async fn destroy(&self) -> Result<(), StorageError> {
        if self.keys.is_namespaced() {
            let keys = self.backend.keys(self.keys.prefix()).await?;
            if !keys.is_empty() {
                self.backend.del(&keys).await?;
            }
            debug!(deleted = keys.len(), "Destroyed namespaced store");
        } else {
            self.backend.flush().await?;
            warn!("Flushed entire backend");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use serde_json::json;

    fn store() -> LogStore {
        LogStore::new(Arc::new(MemoryBackend::new()))
    }

    fn meta(time: u64, reasons: &[&str]) -> Meta {
        Meta::new(EntryId::new(time, "test", 0), time).with_reasons(reasons.iter().copied())
    }

    #[tokio::test]
    async fn test_add_and_by_id() {
        let store = store();
        let added = store
            .add(json!({"type": "A"}), meta(1, &["test"]))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(added.added, Some(1));

        let (action, found) = store.by_id(&EntryId::new(1, "test", 0)).await.unwrap().unwrap();
        assert_eq!(action, json!({"type": "A"}));
        assert_eq!(found.reasons, vec!["test"]);
        assert_eq!(found.added, Some(1));
    }

    #[tokio::test]
    async fn test_duplicate_is_rejected_without_side_effects() {
        let store = store();
        store.add(json!({"type": "A"}), meta(1, &["a"])).await.unwrap();
        let again = store.add(json!({"type": "B"}), meta(1, &["b"])).await.unwrap();
        assert!(again.is_none());

        assert_eq!(store.last_added().await.unwrap(), 1);
        let (action, found) = store.by_id(&EntryId::new(1, "test", 0)).await.unwrap().unwrap();
        assert_eq!(action, json!({"type": "A"}));
        assert_eq!(found.reasons, vec!["a"]);
        assert!(!store.backend.sismember("reasons|1", "b").await.unwrap());
    }

    #[tokio::test]
    async fn test_add_without_reasons_writes_no_reason_set() {
        let store = store();
        store.add(json!({}), meta(1, &[])).await.unwrap();
        assert!(store.backend.keys("reasons|").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_row_layout() {
        let store = store();
        store.add(json!({"type": "A"}), meta(7, &["r"])).await.unwrap();
        let row = store
            .backend
            .hmget("logs|7,test,0", &["time", "created", "added"])
            .await
            .unwrap();
        assert_eq!(row[0].as_deref(), Some("7"));
        assert_eq!(row[1].as_deref(), Some("7\ttest\t0\t7"));
        assert_eq!(row[2].as_deref(), Some("1"));
        assert_eq!(
            store.backend.get("added|1").await.unwrap().as_deref(),
            Some("7,test,0")
        );
    }

    #[tokio::test]
    async fn test_remove() {
        let store = store();
        store.add(json!({"type": "A"}), meta(1, &["r"])).await.unwrap();
        let id = EntryId::new(1, "test", 0);

        let (action, removed) = store.remove(&id).await.unwrap().unwrap();
        assert_eq!(action, json!({"type": "A"}));
        assert_eq!(removed.added, Some(1));

        assert!(store.by_id(&id).await.unwrap().is_none());
        assert_eq!(store.count().await.unwrap(), 0);
        assert!(store.backend.get("added|1").await.unwrap().is_none());
        assert!(store.backend.keys("reasons|").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remove_unknown() {
        let store = store();
        store.add(json!({}), meta(1, &["r"])).await.unwrap();
        assert!(store.remove(&EntryId::new(2, "test", 0)).await.unwrap().is_none());
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_partial_row_reads_as_absent() {
        let store = store();
        // Identity registered and row half written, as after a crash
        store
            .backend
            .sadd("log_ids", &["1,test,0".to_string()])
            .await
            .unwrap();
        store
            .backend
            .hset("logs|1,test,0", &[("action".into(), "{}".into())])
            .await
            .unwrap();

        let id = EntryId::new(1, "test", 0);
        assert!(store.by_id(&id).await.unwrap().is_none());
        assert!(store.remove(&id).await.unwrap().is_none());
        assert!(!store.change_meta(&id, MetaDiff::new().time(2)).await.unwrap());
    }

    #[tokio::test]
    async fn test_has_is_unknown() {
        let store = store();
        store.add(json!({}), meta(1, &["r"])).await.unwrap();
        assert_eq!(store.has(&EntryId::new(1, "test", 0)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_change_meta() {
        let store = store();
        store.add(json!({}), meta(1, &["a"])).await.unwrap();
        let id = EntryId::new(1, "test", 0);

        let diff = MetaDiff::new().reasons(["b"]).field("note", json!("x"));
        assert!(store.change_meta(&id, diff).await.unwrap());

        let (_, changed) = store.by_id(&id).await.unwrap().unwrap();
        assert_eq!(changed.reasons, vec!["b"]);
        assert_eq!(changed.extra["note"], json!("x"));

        let mut index = store.backend.smembers("reasons|1").await.unwrap();
        index.sort();
        assert_eq!(index, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_change_meta_unknown() {
        let store = store();
        let changed = store
            .change_meta(&EntryId::new(9, "x", 0), MetaDiff::new().reasons(["r"]))
            .await
            .unwrap();
        assert!(!changed);
        assert!(store.backend.keys("").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sync_cursor_partial_updates() {
        let store = store();
        assert_eq!(store.last_synced().await.unwrap(), SyncCursor::default());

        let cursor = store.set_last_synced(SyncUpdate::sent(5)).await.unwrap();
        assert_eq!(cursor, SyncCursor { sent: 5, received: 0 });

        let cursor = store.set_last_synced(SyncUpdate::received(3)).await.unwrap();
        assert_eq!(cursor, SyncCursor { sent: 5, received: 3 });

        let cursor = store.set_last_synced(SyncUpdate::default()).await.unwrap();
        assert_eq!(cursor, SyncCursor { sent: 5, received: 3 });
    }

    #[tokio::test]
    async fn test_last_added() {
        let store = store();
        assert_eq!(store.last_added().await.unwrap(), 0);
        store.add(json!({}), meta(1, &["r"])).await.unwrap();
        store.add(json!({}), meta(2, &["r"])).await.unwrap();
        assert_eq!(store.last_added().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_destroy_namespaced_keeps_other_namespaces() {
        let backend: Arc<dyn KvBackend> = Arc::new(MemoryBackend::new());
        let left = LogStore::with_namespace(backend.clone(), "left").unwrap();
        let right = LogStore::with_namespace(backend.clone(), "right").unwrap();
        left.add(json!({}), meta(1, &["r"])).await.unwrap();
        right.add(json!({}), meta(1, &["r"])).await.unwrap();

        left.destroy().await.unwrap();
        assert_eq!(left.count().await.unwrap(), 0);
        assert_eq!(left.last_added().await.unwrap(), 0);
        assert_eq!(right.count().await.unwrap(), 1);
        assert!(right.by_id(&EntryId::new(1, "test", 0)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_nested_namespace_cannot_be_opened() {
        let backend: Arc<dyn KvBackend> = Arc::new(MemoryBackend::new());
        let parent = LogStore::with_namespace(backend.clone(), "app").unwrap();
        assert!(matches!(
            LogStore::with_namespace(backend.clone(), "app:tenant"),
            Err(StorageError::Config(_))
        ));

        let config = StoreConfig::memory().with_namespace("app:tenant");
        assert!(matches!(
            LogStore::open(&config).await,
            Err(StorageError::Config(_))
        ));

        // Keys outside "app:" survive the parent's destroy
        backend.set("other:added", "7").await.unwrap();
        parent.add(json!({}), meta(1, &["r"])).await.unwrap();
        parent.destroy().await.unwrap();
        assert_eq!(parent.count().await.unwrap(), 0);
        assert_eq!(backend.get("other:added").await.unwrap().as_deref(), Some("7"));
    }

    #[tokio::test]
    async fn test_destroy_flushes_backend() {
        let store = store();
        store.add(json!({}), meta(1, &["r"])).await.unwrap();
        store.set_last_synced(SyncUpdate::sent(1)).await.unwrap();
        store.destroy().await.unwrap();
        assert!(store.backend.keys("").await.unwrap().is_empty());
    }
}
