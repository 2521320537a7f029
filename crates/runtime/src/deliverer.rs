//! Delayed delivery: hand a payload to a handler once its delay elapses.
//!
//! A single timer thread owns the pending set. Callers talk to it over an
//! `mpsc` channel, so arming a delivery never blocks and is safe from any
//! thread, before or after the timer starts.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, mpsc};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, trace, warn};

use crate::{as_millis_u64, lock};

/// Fire time used for delays too large to represent as an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// A payload due at `delivery_time`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryItem<T> {
    pub key: String,
    pub value: T,
    pub delivery_time: Instant,
}

/// Handler invoked on the timer thread for every due item. Must not block.
pub type DeliveryHandler<T> = Box<dyn FnMut(DeliveryItem<T>) + Send>;

/// Delayed delivery abstraction.
///
/// At most one pending delivery exists per key; arming a key again replaces
/// both its payload and its fire time.
pub trait DelayedDelivery<T>: Send + Sync {
    /// Arm (or re-arm) `key` to fire after `delay`.
    fn deliver_after(&self, key: &str, value: T, delay: Duration);

    /// Start firing into `handler`. Returns `None` if already started.
    fn start_with_handler(&self, handler: DeliveryHandler<T>) -> Option<thread::JoinHandle<()>>;

    /// Stop firing. Pending items are discarded. Idempotent.
    fn stop(&self);
}

enum Command<T> {
    Arm(DeliveryItem<T>),
    Stop,
}

/// Thread-backed [`DelayedDelivery`] implementation.
#[derive(Debug)]
pub struct DelayingDeliverer<T> {
    name: String,
    updates: mpsc::Sender<Command<T>>,
    receiver: Mutex<Option<mpsc::Receiver<Command<T>>>>,
    stopped: AtomicBool,
}

impl<T: Send + 'static> DelayingDeliverer<T> {
    pub fn new(name: impl Into<String>) -> Self {
        let (updates, receiver) = mpsc::channel();
        Self {
            name: name.into(),
            updates,
            receiver: Mutex::new(Some(receiver)),
            stopped: AtomicBool::new(false),
        }
    }

    /// Arm `key` to fire at `at`.
    pub fn deliver_at(&self, key: impl Into<String>, value: T, at: Instant) {
        if self.stopped.load(Ordering::Acquire) {
            trace!(deliverer = %self.name, "delivery after stop ignored");
            return;
        }
        let item = DeliveryItem {
            key: key.into(),
            value,
            delivery_time: at,
        };
        // The timer thread is gone once stopped; dropping the item is fine.
        let _ = self.updates.send(Command::Arm(item));
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

impl<T: Send + 'static> DelayedDelivery<T> for DelayingDeliverer<T> {
    fn deliver_after(&self, key: &str, value: T, delay: Duration) {
        let now = Instant::now();
        let at = match now.checked_add(delay).or_else(|| now.checked_add(FAR_FUTURE)) {
            Some(at) => at,
            None => {
                warn!(deliverer = %self.name, key, "delay out of range, delivery dropped");
                return;
            }
        };
        if at - now < delay {
            debug!(deliverer = %self.name, key, delay_ms = as_millis_u64(delay), "delay clamped");
        }
        self.deliver_at(key, value, at);
    }

    fn start_with_handler(&self, handler: DeliveryHandler<T>) -> Option<thread::JoinHandle<()>> {
        let receiver = lock(&self.receiver).take()?;
        let name = self.name.clone();

        let join = thread::Builder::new()
            .name(format!("{name}-deliverer"))
            .spawn(move || timer_loop(&name, receiver, handler))
            .expect("failed to spawn deliverer thread");

        Some(join)
    }

    fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.updates.send(Command::Stop);
        // Never started: nothing will drain the buffered items.
        lock(&self.receiver).take();
    }
}

fn timer_loop<T>(name: &str, receiver: mpsc::Receiver<Command<T>>, mut handler: DeliveryHandler<T>) {
    info!(deliverer = name, "deliverer started");
    let mut pending = PendingSet::default();

    'outer: loop {
        for item in pending.pop_due(Instant::now()) {
            trace!(deliverer = name, key = %item.key, "delivering");
            handler(item);
        }

        let first = match pending.next_deadline() {
            Some(deadline) => {
                match receiver.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
                    Ok(cmd) => cmd,
                    Err(mpsc::RecvTimeoutError::Timeout) => continue,
                    Err(mpsc::RecvTimeoutError::Disconnected) => break,
                }
            }
            None => match receiver.recv() {
                Ok(cmd) => cmd,
                Err(_) => break,
            },
        };

        // Apply everything already queued so repeated arms of one key collapse.
        for cmd in std::iter::once(first).chain(receiver.try_iter()) {
            match cmd {
                Command::Arm(item) => pending.arm(item),
                Command::Stop => break 'outer,
            }
        }
    }

    debug!(deliverer = name, discarded = pending.len(), "deliverer stopped");
}

/// Pending deliveries ordered by fire time, at most one per key.
struct PendingSet<T> {
    by_key: HashMap<String, (Instant, u64, T)>,
    by_time: BTreeSet<(Instant, u64, String)>,
    seq: u64,
}

impl<T> Default for PendingSet<T> {
    fn default() -> Self {
        Self {
            by_key: HashMap::new(),
            by_time: BTreeSet::new(),
            seq: 0,
        }
    }
}

impl<T> PendingSet<T> {
    fn arm(&mut self, item: DeliveryItem<T>) {
        self.seq += 1;
        let DeliveryItem {
            key,
            value,
            delivery_time,
        } = item;

        if let Some((at, seq, _)) = self.by_key.remove(&key) {
            self.by_time.remove(&(at, seq, key.clone()));
        }
        self.by_time.insert((delivery_time, self.seq, key.clone()));
        self.by_key.insert(key, (delivery_time, self.seq, value));
    }

    fn pop_due(&mut self, now: Instant) -> Vec<DeliveryItem<T>> {
        let mut due = Vec::new();
        while self.by_time.first().is_some_and(|(at, _, _)| *at <= now) {
            let Some((_, _, key)) = self.by_time.pop_first() else {
                break;
            };
            if let Some((delivery_time, _, value)) = self.by_key.remove(&key) {
                due.push(DeliveryItem {
                    key,
                    value,
                    delivery_time,
                });
            }
        }
        due
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.by_time.first().map(|(at, _, _)| *at)
    }

    fn len(&self) -> usize {
        self.by_key.len()
    }
}
