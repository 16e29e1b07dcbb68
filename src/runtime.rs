//! Runtime façade: brings up the worker scheduler and the I/O monitor
//! together, and tears both down in reverse.

use std::sync::Arc;

use crate::error::Error;
use crate::io::Monitor;
use crate::worker::Scheduler;

/// Default worker thread count when a [`RuntimeConfig`] doesn't set one —
/// one worker per logical CPU, floored at 1.
fn default_worker_threads() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}

/// Builds a [`Runtime`] with documented defaults: one worker thread per
/// CPU, a single poller thread, and an events-per-batch capacity matching
/// [`crate::io::MAX_EVENTS`].
pub struct RuntimeConfig {
    worker_threads: usize,
    poller_threads: usize,
}

impl Default for RuntimeConfig {
    fn default() -> RuntimeConfig {
        RuntimeConfig {
            worker_threads: default_worker_threads(),
            poller_threads: 1,
        }
    }
}

impl RuntimeConfig {
    pub fn new() -> RuntimeConfig {
        RuntimeConfig::default()
    }

    pub fn worker_threads(mut self, n: usize) -> RuntimeConfig {
        self.worker_threads = n;
        self
    }

    pub fn poller_threads(mut self, n: usize) -> RuntimeConfig {
        self.poller_threads = n;
        self
    }

    /// Starts the scheduler and the monitor. If the monitor fails to
    /// start after the scheduler came up, the scheduler is stopped
    /// before the error is returned — no half-started runtime survives
    /// a failed init.
    pub fn build(self) -> Result<Runtime, Error> {
        let scheduler = Scheduler::start(self.worker_threads)?;

        let monitor = match Monitor::start(self.poller_threads) {
            Ok(monitor) => monitor,
            Err(err) => {
                scheduler.stop();
                return Err(err);
            }
        };

        Ok(Runtime { scheduler, monitor })
    }
}

/// An initialized worker pool and I/O monitor pair, ready to host
/// emitters, sockets, and servers.
pub struct Runtime {
    scheduler: Arc<Scheduler>,
    monitor: Arc<Monitor>,
}

impl Runtime {
    pub fn init(worker_threads: usize) -> Result<Runtime, Error> {
        RuntimeConfig::new().worker_threads(worker_threads).build()
    }

    pub fn scheduler(&self) -> Arc<Scheduler> {
        self.scheduler.clone()
    }

    pub fn monitor(&self) -> Arc<Monitor> {
        self.monitor.clone()
    }

    /// Stops the monitor first so no new readiness work can be dispatched
    /// to workers, then stops the scheduler to flush and join it.
    pub fn fini(&self) {
        self.monitor.fini();
        self.scheduler.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_builds_and_tears_down() {
        let runtime = RuntimeConfig::new()
            .worker_threads(2)
            .poller_threads(1)
            .build()
            .expect("runtime should start");
        assert_eq!(runtime.scheduler().worker_count(), 2);
        assert_eq!(runtime.monitor().poller_count(), 1);
        runtime.fini();
    }

    #[test]
    fn zero_worker_threads_is_rejected() {
        let result = RuntimeConfig::new().worker_threads(0).poller_threads(1).build();
        assert!(matches!(result, Err(Error::Invalid)));
    }
}
