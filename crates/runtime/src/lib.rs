//! Scheduling runtime for level-triggered controllers.
//!
//! ## Components
//!
//! - `Backoff`: per-key exponential backoff with periodic GC
//! - `DelayingDeliverer`: fires a payload after a delay, one pending entry per key
//! - `WorkQueue`: deduplicating FIFO with in-flight tracking
//! - `ReconcileWorker`: ties the three together behind the enqueue/run API
//!
//! Everything here runs on plain OS threads; no async runtime is required.

pub mod backoff;
pub mod deliverer;
pub mod queue;
pub mod signal;
pub mod worker;

pub use backoff::{Backoff, BackoffTracker, Clock, FakeClock, SystemClock, start_backoff_gc};
pub use deliverer::{DelayedDelivery, DelayingDeliverer, DeliveryItem};
pub use queue::{QueueMetrics, WorkQueue};
pub use signal::StopSignal;
pub use worker::{ConfigError, ReconcileWorker, WorkerHandle, WorkerStats, WorkerTiming};

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Lock a mutex, recovering the guard if a previous holder panicked.
///
/// State guarded here is only ever left consistent between statements, so a
/// poisoned lock carries no half-applied update.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Whole milliseconds in `d`, saturating at `u64::MAX`.
pub(crate) fn as_millis_u64(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
