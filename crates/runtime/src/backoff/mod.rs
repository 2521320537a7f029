//! Per-key exponential backoff.
//!
//! - `BackoffTracker`: the seam the worker talks to
//! - `Backoff`: in-memory tracker, doubling up to a cap
//! - `start_backoff_gc`: background sweep of stale entries

pub mod clock;
pub mod tracker;

pub use clock::{Clock, FakeClock, SystemClock};
pub use tracker::Backoff;

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::as_millis_u64;
use crate::signal::StopSignal;

/// How often the GC thread sweeps stale backoff entries.
pub const BACKOFF_GC_INTERVAL: Duration = Duration::from_secs(60);

/// Backoff tracker abstraction.
///
/// Keyed by the canonical string form of a key. Implementations must be safe
/// for concurrent use; the worker never holds its own copy of this state.
pub trait BackoffTracker: Send + Sync {
    /// Advance the backoff for `id` as of `event_time`.
    fn next(&self, id: &str, event_time: Instant);

    /// Current delay for `id` (zero when unknown).
    fn get(&self, id: &str) -> Duration;

    /// Forget `id` entirely.
    fn reset(&self, id: &str);

    /// Drop entries that have not been touched for a long time.
    fn gc(&self);

    /// Time source used for `next`.
    fn now(&self) -> Instant;
}

/// Spawn the periodic GC sweep; it exits once `stop` fires.
pub fn start_backoff_gc<B>(backoff: Arc<B>, stop: StopSignal) -> thread::JoinHandle<()>
where
    B: BackoffTracker + ?Sized + 'static,
{
    start_backoff_gc_every(backoff, stop, BACKOFF_GC_INTERVAL)
}

/// Like [`start_backoff_gc`] with an explicit sweep interval.
pub fn start_backoff_gc_every<B>(
    backoff: Arc<B>,
    stop: StopSignal,
    interval: Duration,
) -> thread::JoinHandle<()>
where
    B: BackoffTracker + ?Sized + 'static,
{
    thread::Builder::new()
        .name("backoff-gc".to_string())
        .spawn(move || {
            info!(interval_ms = as_millis_u64(interval), "backoff gc started");
            while !stop.wait_timeout(interval) {
                backoff.gc();
                debug!("backoff gc sweep done");
            }
            info!("backoff gc stopped");
        })
        .expect("failed to spawn backoff gc thread")
}
