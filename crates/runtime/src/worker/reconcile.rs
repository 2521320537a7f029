//! The reconcile worker.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use fedsync_core::{QualifiedName, ReconciliationStatus, Resource};

use super::handle::WorkerHandle;
use super::stats::WorkerStats;
use super::timing::WorkerTiming;
use crate::backoff::{Backoff, BackoffTracker, start_backoff_gc};
use crate::deliverer::{DelayedDelivery, DelayingDeliverer};
use crate::{as_millis_u64, lock};
use crate::queue::WorkQueue;
use crate::signal::StopSignal;

/// Reconcile function type. Must be idempotent: the worker deduplicates
/// pending scheduling, not effects.
pub type ReconcileFn = Arc<dyn Fn(&QualifiedName) -> ReconciliationStatus + Send + Sync>;

/// Schedules keys for reconciliation and retries them according to the
/// status each reconciliation reports.
///
/// Cheap to clone; clones share the same queue, deliverer and backoff state,
/// so a reconcile function may hold one to enqueue related keys.
#[derive(Clone)]
pub struct ReconcileWorker {
    inner: Arc<WorkerInner>,
}

struct WorkerInner {
    name: String,
    reconcile: ReconcileFn,
    timing: RwLock<WorkerTiming>,
    deliverer: Arc<dyn DelayedDelivery<QualifiedName>>,
    queue: Arc<WorkQueue<QualifiedName>>,
    backoff: Arc<dyn BackoffTracker>,
    stats: Mutex<WorkerStats>,
    started: AtomicBool,
}

impl std::fmt::Debug for ReconcileWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconcileWorker")
            .field("name", &self.inner.name)
            .field("timing", &self.timing())
            .finish_non_exhaustive()
    }
}

impl ReconcileWorker {
    /// Build a worker with its own deliverer, queue and backoff tracker.
    ///
    /// Nothing runs until [`run`](Self::run) is called.
    pub fn new<F>(name: impl Into<String>, reconcile: F, timing: WorkerTiming) -> Self
    where
        F: Fn(&QualifiedName) -> ReconciliationStatus + Send + Sync + 'static,
    {
        let name = name.into();
        let timing = timing.or_defaults();
        let backoff = Arc::new(Backoff::new(timing.initial_backoff, timing.max_backoff));
        let deliverer = Arc::new(DelayingDeliverer::<QualifiedName>::new(name.clone()));
        Self::with_collaborators(name, reconcile, timing, backoff, deliverer)
    }

    /// Build a worker around caller-supplied backoff and delivery services.
    pub fn with_collaborators<F>(
        name: impl Into<String>,
        reconcile: F,
        timing: WorkerTiming,
        backoff: Arc<dyn BackoffTracker>,
        deliverer: Arc<dyn DelayedDelivery<QualifiedName>>,
    ) -> Self
    where
        F: Fn(&QualifiedName) -> ReconciliationStatus + Send + Sync + 'static,
    {
        let name = name.into();
        Self {
            inner: Arc::new(WorkerInner {
                queue: Arc::new(WorkQueue::new(name.clone())),
                stats: Mutex::new(WorkerStats {
                    name: name.clone(),
                    ..Default::default()
                }),
                name,
                reconcile: Arc::new(reconcile),
                timing: RwLock::new(timing.or_defaults()),
                deliverer,
                backoff,
                started: AtomicBool::new(false),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn timing(&self) -> WorkerTiming {
        *self.inner.timing.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Update the retry and cluster-sync delays. Other timings are fixed.
    pub fn set_delay(&self, retry_delay: Duration, cluster_sync_delay: Duration) {
        let mut timing = self.inner.timing.write().unwrap_or_else(|e| e.into_inner());
        timing.retry_delay = retry_delay;
        timing.cluster_sync_delay = cluster_sync_delay;
    }

    /// Schedule `key` now and clear its backoff.
    pub fn enqueue(&self, key: &QualifiedName) {
        self.deliver(key, Duration::ZERO, false);
    }

    /// Schedule `key` after its backoff, growing the backoff for next time.
    pub fn enqueue_for_error(&self, key: &QualifiedName) {
        self.deliver(key, Duration::ZERO, true);
    }

    /// Schedule `key` after the retry delay.
    pub fn enqueue_for_retry(&self, key: &QualifiedName) {
        self.deliver(key, self.timing().retry_delay, false);
    }

    /// Schedule `key` after the cluster-sync delay.
    pub fn enqueue_for_cluster_sync(&self, key: &QualifiedName) {
        self.deliver(key, self.timing().cluster_sync_delay, false);
    }

    pub fn enqueue_with_delay(&self, key: &QualifiedName, delay: Duration) {
        self.deliver(key, delay, false);
    }

    /// Schedule the object's key now. Objects without a usable key are skipped.
    pub fn enqueue_object<R: Resource + ?Sized>(&self, obj: &R) {
        match QualifiedName::from_object(obj) {
            Ok(key) => self.enqueue(&key),
            Err(err) => warn!(worker = %self.inner.name, error = %err, "object has no usable key"),
        }
    }

    pub fn stats(&self) -> WorkerStats {
        let mut stats = lock(&self.inner.stats).clone();
        stats.queue = self.inner.queue.metrics();
        stats
    }

    /// Start the backoff GC, the deliverer and the processing loop.
    ///
    /// Returns immediately. Everything winds down once `stop` fires: the
    /// queue is shut down, which ends the processing loop, and the deliverer
    /// stops firing.
    pub fn run(&self, stop: StopSignal) -> WorkerHandle {
        let name = self.inner.name.clone();
        if self.inner.started.swap(true, Ordering::AcqRel) {
            warn!(worker = %name, "worker already running");
            return WorkerHandle::new(name, stop, Vec::new());
        }

        lock(&self.inner.stats).started_at = Some(Utc::now());
        let mut threads = vec![start_backoff_gc(self.inner.backoff.clone(), stop.clone())];

        let queue = self.inner.queue.clone();
        if let Some(t) = self
            .inner
            .deliverer
            .start_with_handler(Box::new(move |item| queue.add(item.value)))
        {
            threads.push(t);
        }

        let worker = self.clone();
        let processing_stop = stop.clone();
        threads.push(
            thread::Builder::new()
                .name(format!("{name}-worker"))
                .spawn(move || worker.process_until(processing_stop))
                .expect("failed to spawn reconcile worker thread"),
        );

        let inner = self.inner.clone();
        let watcher_stop = stop.clone();
        threads.push(
            thread::Builder::new()
                .name(format!("{name}-shutdown"))
                .spawn(move || {
                    watcher_stop.wait();
                    inner.queue.shut_down();
                    inner.deliverer.stop();
                })
                .expect("failed to spawn shutdown watcher thread"),
        );

        WorkerHandle::new(name, stop, threads)
    }

    fn deliver(&self, key: &QualifiedName, mut delay: Duration, failed: bool) {
        let id = key.to_string();
        if failed {
            self.inner.backoff.next(&id, self.inner.backoff.now());
            delay = delay.saturating_add(self.inner.backoff.get(&id));
        } else {
            self.inner.backoff.reset(&id);
        }

        debug!(
            worker = %self.inner.name,
            key = %id,
            delay_ms = as_millis_u64(delay),
            failed,
            "scheduling delivery"
        );
        self.inner.deliverer.deliver_after(&id, key.clone(), delay);
    }

    /// Drain the queue, then sleep a poll interval, until stopped.
    fn process_until(&self, stop: StopSignal) {
        info!(worker = %self.inner.name, "reconcile worker started");

        while !stop.is_triggered() {
            while self.reconcile_once() {}

            if stop.wait_timeout(self.timing().poll_interval) {
                break;
            }
        }

        info!(worker = %self.inner.name, "reconcile worker stopped");
    }

    /// Process one item. Returns `false` once the queue has shut down.
    fn reconcile_once(&self) -> bool {
        let Some(key) = self.inner.queue.get() else {
            return false;
        };

        let status = self.invoke(&key);
        lock(&self.inner.stats).record(status);

        match status {
            ReconciliationStatus::AllOk => {}
            ReconciliationStatus::Error => self.enqueue_for_error(&key),
            ReconciliationStatus::NeedsRecheck => self.enqueue_for_retry(&key),
            ReconciliationStatus::NotSynced => self.enqueue_for_cluster_sync(&key),
        }

        self.inner.queue.done(&key);
        true
    }

    fn invoke(&self, key: &QualifiedName) -> ReconciliationStatus {
        let reconcile = &self.inner.reconcile;
        match panic::catch_unwind(AssertUnwindSafe(|| reconcile(key))) {
            Ok(status) => {
                if status == ReconciliationStatus::Error {
                    warn!(worker = %self.inner.name, key = %key, "reconcile failed");
                } else {
                    debug!(worker = %self.inner.name, key = %key, status = status.as_str(), "reconciled");
                }
                status
            }
            Err(_) => {
                error!(worker = %self.inner.name, key = %key, "reconcile panicked");
                lock(&self.inner.stats).panics += 1;
                ReconciliationStatus::Error
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::FakeClock;
    use crate::deliverer::DeliveryHandler;
    use fedsync_core::ObjectMeta;
    use std::sync::atomic::AtomicUsize;

    /// Records every armed delivery instead of firing it.
    #[derive(Default)]
    struct RecordingDelivery {
        armed: Mutex<Vec<(String, Duration)>>,
    }

    impl RecordingDelivery {
        fn last(&self) -> (String, Duration) {
            self.armed.lock().unwrap().last().cloned().unwrap()
        }

        fn delays(&self) -> Vec<Duration> {
            self.armed.lock().unwrap().iter().map(|(_, d)| *d).collect()
        }
    }

    impl DelayedDelivery<QualifiedName> for RecordingDelivery {
        fn deliver_after(&self, key: &str, _value: QualifiedName, delay: Duration) {
            self.armed.lock().unwrap().push((key.to_string(), delay));
        }

        fn start_with_handler(
            &self,
            _handler: DeliveryHandler<QualifiedName>,
        ) -> Option<thread::JoinHandle<()>> {
            None
        }

        fn stop(&self) {}
    }

    fn key(name: &str) -> QualifiedName {
        QualifiedName::new("default", name).unwrap()
    }

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    struct Fixture {
        worker: ReconcileWorker,
        delivery: Arc<RecordingDelivery>,
        backoff: Arc<Backoff>,
        clock: FakeClock,
    }

    fn fixture<F>(reconcile: F) -> Fixture
    where
        F: Fn(&QualifiedName) -> ReconciliationStatus + Send + Sync + 'static,
    {
        let timing = WorkerTiming::default().with_cluster_sync_delay(secs(30));
        let clock = FakeClock::new();
        let backoff = Arc::new(Backoff::with_clock(
            timing.initial_backoff,
            timing.max_backoff,
            Arc::new(clock.clone()),
        ));
        let delivery = Arc::new(RecordingDelivery::default());
        let worker = ReconcileWorker::with_collaborators(
            "test",
            reconcile,
            timing,
            backoff.clone(),
            delivery.clone(),
        );
        Fixture {
            worker,
            delivery,
            backoff,
            clock,
        }
    }

    #[test]
    fn enqueue_delivers_immediately_under_canonical_key() {
        let f = fixture(|_| ReconciliationStatus::AllOk);
        f.worker.enqueue(&key("web"));
        assert_eq!(f.delivery.last(), ("default/web".to_string(), Duration::ZERO));
    }

    #[test]
    fn errors_grow_backoff_up_to_cap() {
        let f = fixture(|_| ReconciliationStatus::AllOk);
        for _ in 0..6 {
            f.worker.enqueue_for_error(&key("web"));
            f.clock.step(secs(1));
        }

        assert_eq!(
            f.delivery.delays(),
            vec![secs(5), secs(10), secs(20), secs(40), secs(60), secs(60)]
        );
    }

    #[test]
    fn plain_enqueue_resets_backoff() {
        let f = fixture(|_| ReconciliationStatus::AllOk);
        f.worker.enqueue_for_error(&key("web"));
        f.worker.enqueue_for_error(&key("web"));
        assert_eq!(f.backoff.get("default/web"), secs(10));

        f.worker.enqueue(&key("web"));
        assert_eq!(f.backoff.get("default/web"), Duration::ZERO);

        f.worker.enqueue_for_error(&key("web"));
        assert_eq!(f.delivery.last().1, secs(5));
    }

    #[test]
    fn retry_uses_fixed_delay_regardless_of_backoff() {
        let f = fixture(|_| ReconciliationStatus::AllOk);
        f.worker.enqueue_for_error(&key("web"));
        f.worker.enqueue_for_error(&key("web"));
        f.worker.enqueue_for_retry(&key("web"));

        assert_eq!(f.delivery.last().1, secs(10));
        // Any non-error enqueue clears the key's backoff.
        assert_eq!(f.backoff.get("default/web"), Duration::ZERO);
    }

    #[test]
    fn set_delay_changes_retry_and_cluster_sync_independently() {
        let f = fixture(|_| ReconciliationStatus::AllOk);

        f.worker.enqueue_for_cluster_sync(&key("web"));
        assert_eq!(f.delivery.last().1, secs(30));

        f.worker.set_delay(secs(2), secs(30));
        f.worker.enqueue_for_retry(&key("web"));
        assert_eq!(f.delivery.last().1, secs(2));
        f.worker.enqueue_for_cluster_sync(&key("web"));
        assert_eq!(f.delivery.last().1, secs(30));

        f.worker.set_delay(secs(2), secs(7));
        f.worker.enqueue_for_cluster_sync(&key("web"));
        assert_eq!(f.delivery.last().1, secs(7));
        assert_eq!(f.worker.timing().retry_delay, secs(2));
        assert_eq!(f.worker.timing().initial_backoff, secs(5));
    }

    #[test]
    fn enqueue_with_delay_passes_delay_through() {
        let f = fixture(|_| ReconciliationStatus::AllOk);
        f.worker.enqueue_with_delay(&key("web"), Duration::from_millis(1500));
        assert_eq!(f.delivery.last().1, Duration::from_millis(1500));
    }

    #[test]
    fn enqueue_object_derives_key() {
        let f = fixture(|_| ReconciliationStatus::AllOk);
        f.worker.enqueue_object(&ObjectMeta::new("db").in_namespace("prod"));
        assert_eq!(f.delivery.last(), ("prod/db".to_string(), Duration::ZERO));

        f.worker.enqueue_object(&ObjectMeta::new(""));
        assert_eq!(f.delivery.delays().len(), 1);
    }

    #[test]
    fn outcome_picks_next_schedule() {
        let cases = [
            (ReconciliationStatus::AllOk, None),
            (ReconciliationStatus::Error, Some(secs(5))),
            (ReconciliationStatus::NeedsRecheck, Some(secs(10))),
            (ReconciliationStatus::NotSynced, Some(secs(30))),
        ];

        for (status, expected) in cases {
            let f = fixture(move |_| status);
            f.worker.inner.queue.add(key("web"));

            assert!(f.worker.reconcile_once());
            assert_eq!(f.delivery.delays().last().copied(), expected, "{status}");
            assert_eq!(f.worker.stats().reconciliations, 1);
            assert_eq!(f.worker.stats().queue.processing, 0);
        }
    }

    #[test]
    fn panicking_reconcile_is_treated_as_error() {
        let f = fixture(|_| panic!("boom"));
        f.worker.inner.queue.add(key("web"));

        assert!(f.worker.reconcile_once());

        let stats = f.worker.stats();
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.panics, 1);
        assert_eq!(stats.queue.processing, 0);
        assert_eq!(f.delivery.last().1, secs(5));
    }

    #[test]
    fn reconcile_once_reports_shutdown() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let f = fixture(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
            ReconciliationStatus::AllOk
        });

        f.worker.inner.queue.add(key("a"));
        f.worker.inner.queue.shut_down();

        assert!(f.worker.reconcile_once());
        assert!(!f.worker.reconcile_once());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn huge_delays_do_not_stall_processing() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let seen = calls.clone();
        let worker = ReconcileWorker::new(
            "huge-delay",
            move |k: &QualifiedName| {
                seen.lock().unwrap().push(k.name().to_string());
                if k.name() == "a" {
                    ReconciliationStatus::NeedsRecheck
                } else {
                    ReconciliationStatus::AllOk
                }
            },
            WorkerTiming::default().with_poll_interval(Duration::from_millis(10)),
        );
        worker.set_delay(Duration::MAX, Duration::ZERO);

        let handle = worker.run(StopSignal::new());
        worker.enqueue_with_delay(&key("never"), Duration::MAX);
        worker.enqueue(&key("a"));

        let deadline = std::time::Instant::now() + secs(2);
        while calls.lock().unwrap().is_empty() && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(2));
        }
        worker.enqueue(&key("b"));
        while calls.lock().unwrap().len() < 2 && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(2));
        }

        assert_eq!(*calls.lock().unwrap(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(worker.stats().rechecks, 1);
        handle.shutdown();
    }

    #[test]
    fn second_run_is_a_no_op() {
        let f = fixture(|_| ReconciliationStatus::AllOk);
        let stop = StopSignal::new();
        let first = f.worker.run(stop.clone());
        let second = f.worker.run(stop.clone());

        stop.trigger();
        second.join();
        first.join();
        assert!(f.worker.stats().started_at.is_some());
    }
}
