//! Stop signal shared by a worker and its capture sessions
//!
//! Every blocking wait in a capture backend (opening a source, waiting for a
//! frame) goes through the stream's [`StopSignal`], so raising it unblocks
//! the worker within one poll slice instead of one read timeout.

use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Granularity at which backends that cannot wait on the signal directly
/// re-check it
pub const STOP_POLL: Duration = Duration::from_millis(50);

/// Stop flag that also wakes sleepers
#[derive(Debug, Default)]
pub struct StopSignal {
    stopped: Mutex<bool>,
    cond: Condvar,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the flag and wake every sleeper
    pub fn stop(&self) {
        *self.stopped.lock().unwrap_or_else(|e| e.into_inner()) = true;
        self.cond.notify_all();
    }

    pub fn is_stopped(&self) -> bool {
        *self.stopped.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Sleep for up to `duration`; returns `true` if stopped
    pub fn sleep(&self, duration: Duration) -> bool {
        let guard = self.stopped.lock().unwrap_or_else(|e| e.into_inner());
        let (guard, _) = self
            .cond
            .wait_timeout_while(guard, duration, |stopped| !*stopped)
            .unwrap_or_else(|e| e.into_inner());
        *guard
    }

    /// Run `attempt` in [`STOP_POLL`] slices until it yields a value, the
    /// deadline passes or the signal is raised
    ///
    /// `attempt` receives the length of the slice to block for. Returns
    /// `None` on timeout or stop; check [`is_stopped`](Self::is_stopped) to
    /// tell them apart.
    pub fn poll_until<T>(
        &self,
        timeout: Duration,
        mut attempt: impl FnMut(Duration) -> Option<T>,
    ) -> Option<T> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.is_stopped() {
                return None;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if let Some(value) = attempt(remaining.min(STOP_POLL)) {
                return Some(value);
            }
            if Instant::now() >= deadline {
                return None;
            }
        }
    }
}
