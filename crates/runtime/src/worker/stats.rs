//! Worker runtime statistics.

use chrono::{DateTime, Utc};
use serde::Serialize;

use fedsync_core::ReconciliationStatus;

use crate::queue::QueueMetrics;

/// Snapshot of what a worker has done so far.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WorkerStats {
    pub name: String,
    pub started_at: Option<DateTime<Utc>>,
    pub reconciliations: u64,
    pub succeeded: u64,
    pub errors: u64,
    pub rechecks: u64,
    pub not_synced: u64,
    /// Reconcile calls that panicked (also counted in `errors`).
    pub panics: u64,
    pub queue: QueueMetrics,
}

impl WorkerStats {
    pub(crate) fn record(&mut self, status: ReconciliationStatus) {
        self.reconciliations += 1;
        match status {
            ReconciliationStatus::AllOk => self.succeeded += 1,
            ReconciliationStatus::Error => self.errors += 1,
            ReconciliationStatus::NeedsRecheck => self.rechecks += 1,
            ReconciliationStatus::NotSynced => self.not_synced += 1,
        }
    }
}
