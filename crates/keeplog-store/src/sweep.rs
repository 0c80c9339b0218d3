//! Reason sweeps
//!
//! An entry lives while its reason index set is non-empty.
//! [`LogStore::remove_reason`] drops one reason from every entry that carries
//! it and passes the selection criteria, deleting the entries it leaves
//! without reasons. The entry's meta is rewritten to the reasons the index
//! still holds.

use futures::future::try_join_all;
use tracing::{debug, instrument, trace, warn};

use crate::error::StorageError;
use crate::model::{Action, Meta};
use crate::store::{FIELD_ACTION, FIELD_ADDED, FIELD_META, LogStore, decode_entry, parse_added};

/// Which entries a sweep may touch
///
/// Position bounds are inclusive. `older_than` keeps only entries strictly
/// older than the given meta, `younger_than` only strictly younger ones.
#[derive(Debug, Clone, Default)]
pub struct SweepCriteria {
    pub min_added: Option<u64>,
    pub max_added: Option<u64>,
    pub older_than: Option<Meta>,
    pub younger_than: Option<Meta>,
}

impl SweepCriteria {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn min_added(mut self, added: u64) -> Self {
        self.min_added = Some(added);
        self
    }

    pub fn max_added(mut self, added: u64) -> Self {
        self.max_added = Some(added);
        self
    }

    pub fn older_than(mut self, meta: Meta) -> Self {
        self.older_than = Some(meta);
        self
    }

    pub fn younger_than(mut self, meta: Meta) -> Self {
        self.younger_than = Some(meta);
        self
    }

    /// Whether the entry at `added` with `meta` is selected
    pub fn selects(&self, added: u64, meta: &Meta) -> bool {
        if self.min_added.is_some_and(|min| added < min) {
            return false;
        }
        if self.max_added.is_some_and(|max| added > max) {
            return false;
        }
        if let Some(bound) = &self.older_than
            && !meta.is_older_than(bound)
        {
            return false;
        }
        if let Some(bound) = &self.younger_than
            && !bound.is_older_than(meta)
        {
            return false;
        }
        true
    }
}

/// Outcome of one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Entries carrying the reason
    pub matched: usize,
    /// Entries deleted because the reason was their last one
    pub deleted: usize,
    /// Entries that lost the reason but kept others
    pub shrunk: usize,
    /// Entries left alone by the criteria or because their row is partial
    pub skipped: usize,
}

impl LogStore {
    /// Remove `reason` from every selected entry
    ///
    /// `callback` runs once for each entry this call deletes, with the
    /// entry's action and its meta (reasons cleared, `added` attached). It is
    /// not called for entries that keep other reasons.
    #[instrument(skip(self, criteria, callback))]
    pub async fn remove_reason<F>(
        &self,
        reason: &str,
        criteria: &SweepCriteria,
        mut callback: F,
    ) -> Result<SweepReport, StorageError>
    where
        F: FnMut(Action, Meta) + Send,
    {
        let mut report = SweepReport::default();

        let reason_keys = self.backend.keys(&self.keys.reasons_prefix()).await?;
        let checks = reason_keys.iter().map(|key| async move {
            let member = self.backend.sismember(key, reason).await?;
            Ok::<_, StorageError>(member.then_some(key))
        });
        let positions = try_join_all(checks)
            .await?
            .into_iter()
            .flatten()
            .map(|key| self.keys.position_of_reasons_key(key))
            .collect::<Result<Vec<u64>, _>>()?;

        report.matched = positions.len();
        if positions.is_empty() {
            return Ok(report);
        }

        let position_keys: Vec<String> = positions.iter().map(|&n| self.keys.position(n)).collect();
        let log_ids = self.backend.mget(&position_keys).await?;

        let loads = log_ids.iter().map(|log_id| async move {
            match log_id {
                Some(log_id) => self
                    .backend
                    .hmget(
                        &self.keys.entry(log_id),
                        &[FIELD_ACTION, FIELD_META, FIELD_ADDED],
                    )
                    .await
                    .map(Some),
                None => Ok(None),
            }
        });
        let rows = try_join_all(loads).await?;

        for ((position, log_id), row) in positions.iter().zip(&log_ids).zip(rows) {
            let (Some(log_id), Some([Some(action), Some(meta), Some(added)])) =
                (log_id, row.as_deref())
            else {
                warn!(position, "Reason index points at a missing entry, skipping");
                report.skipped += 1;
                continue;
            };
            let added = parse_added(added)?;
            let (action, mut meta) = decode_entry(action, meta, None)?;

            if !criteria.selects(added, &meta) {
                report.skipped += 1;
                continue;
            }

            let reasons_key = self.keys.reasons(added);
            let dropped = [reason.to_string()];
            self.backend.srem(&reasons_key, &dropped).await?;
            // The index is authoritative: change_meta may have replaced the
            // meta's list while earlier reasons still hold the entry
            let remaining = self.backend.smembers(&reasons_key).await?;

            if remaining.is_empty() {
                self.delete_entry(log_id, added).await?;
                meta.reasons.clear();
                meta.added = Some(added);
                trace!(added, "Swept entry");
                callback(action, meta);
                report.deleted += 1;
            } else {
                meta.reasons.retain(|r| remaining.contains(r));
                for held in remaining {
                    if !meta.reasons.contains(&held) {
                        meta.reasons.push(held);
                    }
                }
                let entry_key = self.keys.entry(log_id);
                let fields = [(FIELD_META.to_string(), serde_json::to_string(&meta)?)];
                self.backend.hset(&entry_key, &fields).await?;
                trace!(added, reasons = meta.reasons.len(), "Shrunk entry");
                report.shrunk += 1;
            }
        }

        debug!(
            matched = report.matched,
            deleted = report.deleted,
            shrunk = report.shrunk,
            skipped = report.skipped,
            "Swept reason"
        );
        Ok(report)
    }
}
