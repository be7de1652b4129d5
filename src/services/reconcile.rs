//! Merge of a fresh crawl into the previously persisted dataset
//!
//! All operations are keyed on site id. With `Incremental { prune_missing: true }`
//! every existing site that the crawl did not rediscover is dropped, which is
//! only correct when the crawl covered the whole area of the existing set.
//! That coverage is the caller's responsibility.

use crate::domain::site::Dataset;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergePolicy {
    /// Output is the fresh set alone
    Replace,
    /// Fresh sites are added to the existing set, replacing shared ids
    Incremental { prune_missing: bool },
}

impl MergePolicy {
    pub fn new(incremental: bool, prune_missing: bool) -> Self {
        if incremental {
            MergePolicy::Incremental { prune_missing }
        } else {
            MergePolicy::Replace
        }
    }

    pub fn is_incremental(&self) -> bool {
        matches!(self, MergePolicy::Incremental { .. })
    }

    pub fn prunes(&self) -> bool {
        matches!(self, MergePolicy::Incremental { prune_missing: true })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Fresh ids not previously known
    pub added: usize,
    /// Fresh ids that replaced an existing record
    pub refreshed: usize,
    /// Existing records carried over untouched
    pub kept: usize,
    /// Existing records dropped from the output
    pub pruned: usize,
}

impl ReconcileReport {
    pub fn log(&self, policy: MergePolicy) {
        info!(
            policy = ?policy,
            added = self.added,
            refreshed = self.refreshed,
            kept = self.kept,
            pruned = self.pruned,
            "dataset_reconciled"
        );
    }
}

pub fn reconcile(existing: Dataset, fresh: Dataset, policy: MergePolicy) -> (Dataset, ReconcileReport) {
    let refreshed = fresh.keys().filter(|id| existing.contains_key(*id)).count();
    let mut report = ReconcileReport { added: fresh.len() - refreshed, refreshed, ..Default::default() };

    let output = match policy {
        MergePolicy::Replace => {
            report.pruned = existing.len() - refreshed;
            fresh
        }
        MergePolicy::Incremental { prune_missing } => {
            let mut output = existing;
            if prune_missing {
                let before = output.len();
                output.retain(|id, _| fresh.contains_key(id));
                report.pruned = before - output.len();
            } else {
                report.kept = output.len() - refreshed;
            }
            output.extend(fresh);
            output
        }
    };

    (output, report)
}
