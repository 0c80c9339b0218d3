//! Entry types
//!
//! An entry is an opaque JSON action plus its [`Meta`]. The meta carries the
//! producer-assigned [`EntryId`], a timestamp and the reasons that keep the
//! entry alive. Once admitted, the store attaches the `added` position to
//! every meta it hands back.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::StorageError;

/// Opaque application payload
pub type Action = Value;

/// An admitted entry as returned by reads
pub type Entry = (Action, Meta);

/// Globally unique entry identifier `[time, node, seq]`
///
/// Assigned by the producer of the entry, never by the store. Serializes as
/// a JSON array and renders as the comma-joined tuple, which is the primary
/// key used by every index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "(u64, String, u64)", into = "(u64, String, u64)")]
pub struct EntryId {
    /// Producer timestamp
    pub time: u64,
    /// Producer node id
    pub node: String,
    /// Producer-local sequence number
    pub seq: u64,
}

impl EntryId {
    /// Create a new entry id
    pub fn new(time: u64, node: impl Into<String>, seq: u64) -> Self {
        Self {
            time,
            node: node.into(),
            seq,
        }
    }

    /// Tie-break components after the leading time, tab-joined
    pub fn tie_break(&self) -> String {
        format!("{}\t{}", self.node, self.seq)
    }
}

impl From<(u64, String, u64)> for EntryId {
    fn from((time, node, seq): (u64, String, u64)) -> Self {
        Self { time, node, seq }
    }
}

impl From<EntryId> for (u64, String, u64) {
    fn from(id: EntryId) -> Self {
        (id.time, id.node, id.seq)
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{}", self.time, self.node, self.seq)
    }
}

/// Parses the rendered form; the node may itself contain commas
impl std::str::FromStr for EntryId {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || StorageError::invalid_key(format!("invalid entry id {s:?}"));
        let (time, rest) = s.split_once(',').ok_or_else(invalid)?;
        let (node, seq) = rest.rsplit_once(',').ok_or_else(invalid)?;
        Ok(Self {
            time: time.trim().parse().map_err(|_| invalid())?,
            node: node.to_string(),
            seq: seq.trim().parse().map_err(|_| invalid())?,
        })
    }
}

/// Entry metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Meta {
    /// Entry identifier
    pub id: EntryId,
    /// Entry timestamp, not necessarily unique
    pub time: u64,
    /// Owner tags keeping the entry alive
    #[serde(default)]
    pub reasons: Vec<String>,
    /// Store position, attached on results only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub added: Option<u64>,
    /// Any additional application fields
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Meta {
    /// Create metadata with no reasons
    pub fn new(id: EntryId, time: u64) -> Self {
        Self {
            id,
            time,
            reasons: Vec::new(),
            added: None,
            extra: Map::new(),
        }
    }

    /// Set the reasons
    pub fn with_reasons<I, S>(mut self, reasons: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.reasons = reasons.into_iter().map(Into::into).collect();
        self
    }

    /// Set an additional field
    pub fn with_field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.extra.insert(name.into(), value);
        self
    }

    /// Lexicographic ordering key used for `created` order
    ///
    /// Fields are rendered without padding, so string order only matches
    /// chronological order while the rendered numbers share a width.
    pub fn created_key(&self) -> String {
        format!("{}\t{}\t{}", self.time, self.id.tie_break(), self.id.time)
    }

    /// Whether this entry sorts strictly before `other`
    ///
    /// Compares `time` numerically, then the id tie-break string, then the
    /// id's own timestamp.
    pub fn is_older_than(&self, other: &Meta) -> bool {
        let ordering = self
            .time
            .cmp(&other.time)
            .then_with(|| self.id.tie_break().cmp(&other.id.tie_break()))
            .then_with(|| self.id.time.cmp(&other.id.time));
        ordering == Ordering::Less
    }

    /// Apply a shallow patch
    pub fn apply(&mut self, diff: &MetaDiff) {
        if let Some(time) = diff.time {
            self.time = time;
        }
        if let Some(reasons) = &diff.reasons {
            self.reasons = reasons.clone();
        }
        for (name, value) in &diff.fields {
            self.extra.insert(name.clone(), value.clone());
        }
    }
}

/// Partial metadata update for `change_meta`
///
/// Every present field overwrites the stored one. The id and the store
/// position cannot be changed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetaDiff {
    pub time: Option<u64>,
    pub reasons: Option<Vec<String>>,
    pub fields: Map<String, Value>,
}

impl MetaDiff {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn time(mut self, time: u64) -> Self {
        self.time = Some(time);
        self
    }

    pub fn reasons<I, S>(mut self, reasons: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.reasons = Some(reasons.into_iter().map(Into::into).collect());
        self
    }

    pub fn field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.fields.insert(name.into(), value);
        self
    }
}

/// Listing order for [`LogStore::get`](crate::LogStore::get)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Order {
    /// Store position, numeric, newest first
    #[default]
    Added,
    /// Ordering key, lexicographic, newest first
    Created,
}

impl Order {
    /// Entry table field holding the sort key
    pub fn field(self) -> &'static str {
        match self {
            Order::Added => "added",
            Order::Created => "created",
        }
    }

    /// Whether the sort compares strings rather than numbers
    pub fn is_alpha(self) -> bool {
        matches!(self, Order::Created)
    }
}

impl std::str::FromStr for Order {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "added" => Ok(Order::Added),
            "created" => Ok(Order::Created),
            other => Err(format!("unknown order '{other}', expected added or created")),
        }
    }
}

/// Peer synchronization watermarks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SyncCursor {
    pub sent: u64,
    pub received: u64,
}

/// Partial watermark update; absent fields are left as stored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncUpdate {
    pub sent: Option<u64>,
    pub received: Option<u64>,
}

impl SyncUpdate {
    pub fn sent(sent: u64) -> Self {
        Self {
            sent: Some(sent),
            received: None,
        }
    }

    pub fn received(received: u64) -> Self {
        Self {
            sent: None,
            received: Some(received),
        }
    }
}
