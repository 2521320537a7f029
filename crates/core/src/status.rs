//! Outcome of a single reconciliation.

use serde::{Deserialize, Serialize};

/// What a reconcile function reports back to the worker.
///
/// Produced fresh on every call and consumed immediately to pick the next
/// scheduling action; never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconciliationStatus {
    /// Observed state matches desired state. Nothing more to do.
    AllOk,
    /// Reconciliation failed; retry with growing backoff.
    Error,
    /// Not done yet; check again after the fixed retry delay.
    NeedsRecheck,
    /// The wider system is not synced yet; retry after the cluster-sync delay.
    NotSynced,
}

impl ReconciliationStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, ReconciliationStatus::AllOk)
    }

    /// Stable label for log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconciliationStatus::AllOk => "all_ok",
            ReconciliationStatus::Error => "error",
            ReconciliationStatus::NeedsRecheck => "needs_recheck",
            ReconciliationStatus::NotSynced => "not_synced",
        }
    }
}

impl core::fmt::Display for ReconciliationStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}
