//! In-memory exponential backoff tracker.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::trace;

use super::BackoffTracker;
use super::clock::{Clock, SystemClock};
use crate::{as_millis_u64, lock};

#[derive(Debug, Clone, Copy)]
struct BackoffEntry {
    backoff: Duration,
    last_update: Instant,
}

/// Per-key backoff: `initial` on the first failure, doubling on each
/// further failure, capped at `max`.
///
/// An entry untouched for more than `2 * max` is considered stable: the next
/// failure starts over at `initial`, and [`gc`](BackoffTracker::gc) drops it.
#[derive(Debug)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<String, BackoffEntry>>,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self::with_clock(initial, max, Arc::new(SystemClock))
    }

    pub fn with_clock(initial: Duration, max: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            initial,
            max,
            clock,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn initial(&self) -> Duration {
        self.initial
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    /// True while `id` is still backing off from a failure seen at `event_time`.
    pub fn is_in_backoff_since(&self, id: &str, event_time: Instant) -> bool {
        let entries = lock(&self.entries);
        let Some(entry) = entries.get(id) else {
            return false;
        };
        if self.has_expired(event_time, entry.last_update) {
            return false;
        }
        self.clock.now().saturating_duration_since(event_time) < entry.backoff
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn has_expired(&self, event_time: Instant, last_update: Instant) -> bool {
        event_time.saturating_duration_since(last_update) > self.max * 2
    }
}

impl BackoffTracker for Backoff {
    fn next(&self, id: &str, event_time: Instant) {
        let now = self.clock.now();
        let mut entries = lock(&self.entries);

        let backoff = match entries.get(id) {
            Some(entry) if !self.has_expired(event_time, entry.last_update) => {
                entry.backoff.saturating_mul(2).min(self.max)
            }
            _ => self.initial.min(self.max),
        };

        entries.insert(
            id.to_string(),
            BackoffEntry {
                backoff,
                last_update: now,
            },
        );
        trace!(key = id, backoff_ms = as_millis_u64(backoff), "backoff advanced");
    }

    fn get(&self, id: &str) -> Duration {
        lock(&self.entries)
            .get(id)
            .map(|e| e.backoff)
            .unwrap_or(Duration::ZERO)
    }

    fn reset(&self, id: &str) {
        lock(&self.entries).remove(id);
    }

    fn gc(&self) {
        let now = self.clock.now();
        let mut entries = lock(&self.entries);
        let before = entries.len();
        entries.retain(|_, e| !self.has_expired(now, e.last_update));
        let removed = before - entries.len();
        if removed > 0 {
            trace!(removed, "backoff entries collected");
        }
    }

    fn now(&self) -> Instant {
        self.clock.now()
    }
}
