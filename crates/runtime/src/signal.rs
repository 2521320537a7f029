//! One-shot, broadcast stop signal shared by every background thread.

use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crate::lock;

/// Cooperative cancellation flag.
///
/// Clones share state: triggering any clone wakes every waiter. Once
/// triggered it stays triggered.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    stopped: Mutex<bool>,
    cond: Condvar,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request stop and wake all waiters. Idempotent.
    pub fn trigger(&self) {
        let mut stopped = lock(&self.inner.stopped);
        *stopped = true;
        self.inner.cond.notify_all();
    }

    pub fn is_triggered(&self) -> bool {
        *lock(&self.inner.stopped)
    }

    /// Block until the signal is triggered.
    pub fn wait(&self) {
        let mut stopped = lock(&self.inner.stopped);
        while !*stopped {
            stopped = self
                .inner
                .cond
                .wait(stopped)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
        }
    }

    /// Block for up to `timeout`. Returns `true` if the signal fired.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let stopped = lock(&self.inner.stopped);
        let (stopped, _) = self
            .inner
            .cond
            .wait_timeout_while(stopped, timeout, |stopped| !*stopped)
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *stopped
    }
}
