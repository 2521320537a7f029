//! Deduplicating work queue with in-flight tracking.
//!
//! Semantics follow the classic controller work queue:
//!
//! - an item is either *pending* (in the FIFO), *processing* (handed out by
//!   `get` and not yet `done`), or absent
//! - adding a pending item is a no-op
//! - adding a processing item marks it dirty; `done` puts it back in the FIFO
//! - `shut_down` refuses new items and wakes every waiter, but items already
//!   queued are still handed out until the FIFO is empty

use std::collections::{HashSet, VecDeque};
use std::hash::Hash;
use std::sync::{Condvar, Mutex, PoisonError};

use serde::Serialize;
use tracing::debug;

use crate::lock;

/// Point-in-time queue counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueMetrics {
    /// Every `add` call, including ones collapsed into an existing item.
    pub adds: u64,
    /// Items waiting in the FIFO.
    pub depth: usize,
    /// Items handed out and not yet `done`.
    pub processing: usize,
}

#[derive(Debug)]
struct QueueState<T> {
    queue: VecDeque<T>,
    dirty: HashSet<T>,
    processing: HashSet<T>,
    shutting_down: bool,
    adds: u64,
}

/// Thread-safe deduplicating FIFO.
#[derive(Debug)]
pub struct WorkQueue<T> {
    name: String,
    state: Mutex<QueueState<T>>,
    cond: Condvar,
}

impl<T> WorkQueue<T>
where
    T: Eq + Hash + Clone,
{
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(QueueState {
                queue: VecDeque::new(),
                dirty: HashSet::new(),
                processing: HashSet::new(),
                shutting_down: false,
                adds: 0,
            }),
            cond: Condvar::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queue `item` unless it is already pending; defer it if it is processing.
    pub fn add(&self, item: T) {
        let mut state = lock(&self.state);
        state.adds += 1;

        if state.shutting_down {
            return;
        }
        if state.dirty.contains(&item) {
            return;
        }
        state.dirty.insert(item.clone());
        if state.processing.contains(&item) {
            return;
        }

        state.queue.push_back(item);
        self.cond.notify_one();
    }

    /// Block until an item is available.
    ///
    /// Returns `None` once the queue is shut down and drained.
    pub fn get(&self) -> Option<T> {
        let mut state = lock(&self.state);
        while state.queue.is_empty() && !state.shutting_down {
            state = self
                .cond
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }

        let item = state.queue.pop_front()?;
        state.processing.insert(item.clone());
        state.dirty.remove(&item);
        Some(item)
    }

    /// Mark `item` as no longer processing, re-queueing it if it went dirty.
    pub fn done(&self, item: &T) {
        let mut state = lock(&self.state);
        state.processing.remove(item);

        if state.dirty.contains(item) {
            state.queue.push_back(item.clone());
            self.cond.notify_one();
        }
    }

    /// Refuse further adds and wake all waiters.
    pub fn shut_down(&self) {
        let mut state = lock(&self.state);
        if !state.shutting_down {
            debug!(queue = %self.name, remaining = state.queue.len(), "work queue shutting down");
        }
        state.shutting_down = true;
        self.cond.notify_all();
    }

    pub fn is_shutting_down(&self) -> bool {
        lock(&self.state).shutting_down
    }

    /// Number of items waiting in the FIFO.
    pub fn len(&self) -> usize {
        lock(&self.state).queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn metrics(&self) -> QueueMetrics {
        let state = lock(&self.state);
        QueueMetrics {
            adds: state.adds,
            depth: state.queue.len(),
            processing: state.processing.len(),
        }
    }
}
