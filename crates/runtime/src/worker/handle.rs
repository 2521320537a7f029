use std::thread;

use tracing::warn;

use crate::signal::StopSignal;

/// Handle to control and join a running worker.
#[derive(Debug)]
pub struct WorkerHandle {
    name: String,
    stop: StopSignal,
    threads: Vec<thread::JoinHandle<()>>,
}

impl WorkerHandle {
    pub(crate) fn new(name: String, stop: StopSignal, threads: Vec<thread::JoinHandle<()>>) -> Self {
        Self {
            name,
            stop,
            threads,
        }
    }

    /// The signal this worker stops on.
    pub fn stop_signal(&self) -> &StopSignal {
        &self.stop
    }

    /// Request graceful shutdown and wait for every worker thread to exit.
    pub fn shutdown(self) {
        self.stop.trigger();
        self.join();
    }

    /// Wait for every worker thread to exit. Blocks until the stop signal fires.
    pub fn join(self) {
        for t in self.threads {
            if t.join().is_err() {
                warn!(worker = %self.name, "worker thread panicked");
            }
        }
    }
}
