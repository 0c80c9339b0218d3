//! # Keeplog Store
//!
//! Reference-counted, append-mostly log storage over a key-value/set backend.
//!
//! Entries are opaque JSON actions plus metadata. Every admitted entry gets a
//! strictly increasing store position (`added`) and lives for as long as at
//! least one *reason* names it. Sweeping a reason deletes the entries that
//! held only that reason.
//!
//! ## Features
//!
//! - **LogStore**: admission with id deduplication, lookup, removal,
//!   metadata patches and peer sync watermarks
//! - **Pagination**: newest-first listing by position or by creation key,
//!   100 entries per page with forward-only continuations
//! - **Reason sweeps**: `remove_reason` with position and age criteria
//! - **KvBackend trait**: the command surface the store needs, implemented by
//!   [`MemoryBackend`], [`RedbBackend`] and (with the `redis` feature)
//!   `RedisBackend`
//!
//! ## Example
//!
//! ```rust,ignore
//! use keeplog_store::{EntryId, LogStore, Meta, Order, StoreConfig, SweepCriteria};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = LogStore::open(&StoreConfig::memory()).await.unwrap();
//!
//!     let meta = Meta::new(EntryId::new(1, "server:a", 0), 1).with_reasons(["lastValue"]);
//!     let added = store.add(json!({"type": "rename"}), meta).await.unwrap();
//!     assert_eq!(added.unwrap().added, Some(1));
//!
//!     let page = store.get(Order::Added).await.unwrap();
//!     assert_eq!(page.entries.len(), 1);
//!
//!     store
//!         .remove_reason("lastValue", &SweepCriteria::new(), |action, meta| {
//!             println!("dropped {action} at {:?}", meta.added);
//!         })
//!         .await
//!         .unwrap();
//! }
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod keys;
pub mod model;
pub mod pagination;
pub mod store;
pub mod sweep;

// Re-exports
pub use backend::{KvBackend, MemoryBackend, RedbBackend, open_backend};
#[cfg(feature = "redis")]
pub use backend::RedisBackend;
pub use config::{BackendConfig, StoreConfig};
pub use error::StorageError;
pub use keys::Keyspace;
pub use model::{Action, Entry, EntryId, Meta, MetaDiff, Order, SyncCursor, SyncUpdate};
pub use pagination::{PAGE_SIZE, Page, PageCursor};
pub use store::LogStore;
pub use sweep::{SweepCriteria, SweepReport};
