//! Key layout in the backend
//!
//! ```text
//! log_ids            set   identity index (entry id strings)
//! added              str   sequencer
//! added|{n}          str   position index: n -> entry id
//! logs|{id}          hash  entry table: action, meta, time, created, added
//! reasons|{n}        set   reason index for position n
//! lastsynced         hash  sync cursor: sent, received
//! ```
//!
//! Every key is prefixed with `{namespace}:` when a namespace is configured.
//! Namespaces may not contain `:`, so no namespace's prefix covers another's.

use crate::error::StorageError;

const LOG_IDS: &str = "log_ids";
const SEQUENCER: &str = "added";
const POSITION: &str = "added|";
const ENTRY: &str = "logs|";
const REASONS: &str = "reasons|";
const LAST_SYNCED: &str = "lastsynced";

/// Key builder for one store instance
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Keyspace {
    prefix: String,
}

impl Keyspace {
    /// Keyspace with an optional namespace
    pub fn new(namespace: Option<&str>) -> Result<Self, StorageError> {
        let prefix = match namespace {
            Some(ns) if ns.contains(':') => {
                return Err(StorageError::config(format!(
                    "namespace {ns:?} must not contain ':'"
                )));
            }
            Some(ns) if !ns.is_empty() => format!("{ns}:"),
            _ => String::new(),
        };
        Ok(Self { prefix })
    }

    /// Prefix shared by every key, empty without a namespace
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn is_namespaced(&self) -> bool {
        !self.prefix.is_empty()
    }

    pub fn log_ids(&self) -> String {
        format!("{}{LOG_IDS}", self.prefix)
    }

    pub fn sequencer(&self) -> String {
        format!("{}{SEQUENCER}", self.prefix)
    }

    pub fn position(&self, added: u64) -> String {
        format!("{}{POSITION}{added}", self.prefix)
    }

    pub fn entry(&self, id: &str) -> String {
        format!("{}{ENTRY}{id}", self.prefix)
    }

    /// Prefix that turns an identity index member into its entry key
    pub fn entry_prefix(&self) -> String {
        format!("{}{ENTRY}", self.prefix)
    }

    pub fn reasons(&self, added: u64) -> String {
        format!("{}{REASONS}{added}", self.prefix)
    }

    pub fn reasons_prefix(&self) -> String {
        format!("{}{REASONS}", self.prefix)
    }

    pub fn last_synced(&self) -> String {
        format!("{}{LAST_SYNCED}", self.prefix)
    }

    /// Parse the position out of a reason index key
    pub fn position_of_reasons_key(&self, key: &str) -> Result<u64, StorageError> {
        key.strip_prefix(&self.reasons_prefix())
            .and_then(|n| n.parse().ok())
            .ok_or_else(|| StorageError::invalid_key(format!("not a reason index key: {key}")))
    }
}
