//! Shutdown and wakeup signalling shared by a queue's workers.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

pub(crate) struct Signal {
    state: Mutex<SignalState>,
    cond: Condvar,
}

struct SignalState {
    shutdown: bool,
    // Bumped on every producer wakeup so a notify between two waits is
    // never lost.
    ticket: u64,
}

impl Signal {
    pub(crate) fn new() -> Signal {
        Signal {
            state: Mutex::new(SignalState {
                shutdown: false,
                ticket: 0,
            }),
            cond: Condvar::new(),
        }
    }

    fn locked(&self) -> MutexGuard<'_, SignalState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn shutdown(&self) {
        self.locked().shutdown = true;
        self.cond.notify_all();
    }

    pub(crate) fn is_shutdown(&self) -> bool {
        self.locked().shutdown
    }

    /// Wakes any worker parked in `wait_notified`.
    pub(crate) fn notify(&self) {
        self.locked().ticket += 1;
        self.cond.notify_all();
    }

    /// Parks until a producer wakeup, the timeout, or shutdown.
    /// Returns true when shutdown was signalled.
    pub(crate) fn wait_notified(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.locked();
        let seen = state.ticket;
        while !state.shutdown && state.ticket == seen {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let (guard, _) = self
                .cond
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            state = guard;
        }
        state.shutdown
    }

    /// Parks until the timeout or shutdown, ignoring producer wakeups.
    /// Returns true when shutdown was signalled.
    pub(crate) fn wait_shutdown(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.locked();
        while !state.shutdown {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let (guard, _) = self
                .cond
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            state = guard;
        }
        state.shutdown
    }
}
