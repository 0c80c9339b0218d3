//! Typed values shared by the in-process and redb backends

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::SortQuery;
use crate::error::StorageError;

/// Value stored under one key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Value {
    Str(String),
    Set(BTreeSet<String>),
    Hash(BTreeMap<String, String>),
}

impl Value {
    pub fn as_str(&self, key: &str) -> Result<&str, StorageError> {
        match self {
            Value::Str(s) => Ok(s),
            _ => Err(StorageError::wrong_type(key, "string")),
        }
    }

    pub fn as_set(&self, key: &str) -> Result<&BTreeSet<String>, StorageError> {
        match self {
            Value::Set(set) => Ok(set),
            _ => Err(StorageError::wrong_type(key, "set")),
        }
    }

    pub fn as_set_mut(&mut self, key: &str) -> Result<&mut BTreeSet<String>, StorageError> {
        match self {
            Value::Set(set) => Ok(set),
            _ => Err(StorageError::wrong_type(key, "set")),
        }
    }

    pub fn as_hash(&self, key: &str) -> Result<&BTreeMap<String, String>, StorageError> {
        match self {
            Value::Hash(hash) => Ok(hash),
            _ => Err(StorageError::wrong_type(key, "hash")),
        }
    }

    pub fn as_hash_mut(
        &mut self,
        key: &str,
    ) -> Result<&mut BTreeMap<String, String>, StorageError> {
        match self {
            Value::Hash(hash) => Ok(hash),
            _ => Err(StorageError::wrong_type(key, "hash")),
        }
    }

    /// Hash field lookup that treats any non-hash value as missing
    pub fn hash_field(&self, field: &str) -> Option<String> {
        match self {
            Value::Hash(hash) => hash.get(field).cloned(),
            _ => None,
        }
    }
}

/// Increment a counter value in place, creating it when absent
pub(crate) fn increment(key: &str, current: Option<&Value>) -> Result<u64, StorageError> {
    let current = match current {
        Some(value) => value
            .as_str(key)?
            .parse::<u64>()
            .map_err(|_| StorageError::wrong_type(key, "integer"))?,
        None => 0,
    };
    current
        .checked_add(1)
        .ok_or_else(|| StorageError::Backend(format!("increment of {key} would overflow")))
}

enum SortKey {
    Number(f64),
    Text(Option<String>),
}

impl SortKey {
    fn compare(&self, other: &SortKey) -> Ordering {
        match (self, other) {
            (SortKey::Number(a), SortKey::Number(b)) => a.total_cmp(b),
            (SortKey::Text(a), SortKey::Text(b)) => a.cmp(b),
            _ => Ordering::Equal,
        }
    }
}

/// Evaluate a [`SortQuery`] over `members`
///
/// `lookup(key, field)` resolves one hash field. Numeric mode treats a
/// missing sort key as 0 and fails on anything that is not a number; equal
/// keys fall back to member order so results are deterministic.
pub(crate) fn sort_members<F>(
    members: Vec<String>,
    query: &SortQuery,
    mut lookup: F,
) -> Result<Vec<Option<String>>, StorageError>
where
    F: FnMut(&str, &str) -> Result<Option<String>, StorageError>,
{
    let mut scored = Vec::with_capacity(members.len());
    for member in members {
        let raw = lookup(&query.by.key_for(&member), &query.by.field)?;
        let key = if query.alpha {
            SortKey::Text(raw)
        } else {
            let number = match raw {
                Some(text) => text.trim().parse::<f64>().map_err(|_| {
                    StorageError::Backend(format!(
                        "sort key {text:?} of member {member} can't be converted into a number"
                    ))
                })?,
                None => 0.0,
            };
            SortKey::Number(number)
        };
        scored.push((key, member));
    }

    scored.sort_by(|(a, a_member), (b, b_member)| a.compare(b).then_with(|| a_member.cmp(b_member)));
    if query.descending {
        scored.reverse();
    }

    let mut out = Vec::new();
    for (_, member) in scored.into_iter().skip(query.offset).take(query.count) {
        for field in &query.get {
            out.push(lookup(&field.key_for(&member), &field.field)?);
        }
    }
    Ok(out)
}
