//! Reconciliation worker: the public scheduling contract.
//!
//! ```text
//! enqueue* ──► backoff ──► deliverer ──(after delay)──► work queue ──► reconcile
//!    ▲                                                                    │
//!    └──────────────── error / needs recheck / not synced ◄──────────────┘
//! ```

pub mod handle;
pub mod reconcile;
pub mod stats;
pub mod timing;

pub use handle::WorkerHandle;
pub use reconcile::{ReconcileFn, ReconcileWorker};
pub use stats::WorkerStats;
pub use timing::{ConfigError, WorkerTiming};
