//! Wakeup signal shared between the manager and one background worker.

use parking_lot::{Condvar, Mutex};
use std::time::Duration;

struct SignalState {
    notified: bool,
    stopped: bool,
}

/// Condition-variable based wakeup with a stop flag.
///
/// Workers block in [`WorkerSignal::wait`] with a timeout so every loop
/// runs at least once per interval even without signals.
pub(crate) struct WorkerSignal {
    state: Mutex<SignalState>,
    condvar: Condvar,
}

impl WorkerSignal {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(SignalState {
                notified: false,
                stopped: false,
            }),
            condvar: Condvar::new(),
        }
    }

    /// Wake the worker for an extra iteration.
    pub(crate) fn notify(&self) {
        let mut st = self.state.lock();
        st.notified = true;
        self.condvar.notify_all();
    }

    /// Ask the worker to finish its current iteration and exit.
    pub(crate) fn stop(&self) {
        let mut st = self.state.lock();
        st.stopped = true;
        self.condvar.notify_all();
    }

    /// Whether stop was requested.
    pub(crate) fn stopped(&self) -> bool {
        self.state.lock().stopped
    }

    /// Block until notified, stopped, or `timeout` elapses, consuming a
    /// pending notification. Returns `true` when stop was requested.
    pub(crate) fn wait(&self, timeout: Duration) -> bool {
        let mut st = self.state.lock();
        if !st.notified && !st.stopped {
            let _ = self.condvar.wait_for(&mut st, timeout);
        }
        st.notified = false;
        st.stopped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Instant;

    #[test]
    fn wait_returns_early_when_notified() {
        let signal = Arc::new(WorkerSignal::new());
        let waiter = signal.clone();
        let handle = std::thread::spawn(move || {
            let start = Instant::now();
            let stopped = waiter.wait(Duration::from_secs(10));
            (stopped, start.elapsed())
        });
        std::thread::sleep(Duration::from_millis(20));
        signal.notify();
        let (stopped, elapsed) = handle.join().unwrap();
        assert!(!stopped);
        assert!(elapsed < Duration::from_secs(5));
    }

    #[test]
    fn stop_is_sticky() {
        let signal = WorkerSignal::new();
        signal.stop();
        assert!(signal.wait(Duration::from_millis(1)));
        assert!(signal.wait(Duration::from_millis(1)));
        assert!(signal.stopped());
    }
}
