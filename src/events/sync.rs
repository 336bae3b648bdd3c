//! Clock sync gate
//!
//! The logger and every hardware-facing producer block on a shared start gate.
//! When the session opens it, each participant records its own local clock
//! reading; the collected offsets are stored with the session metadata so the
//! per-producer time bases can be aligned afterwards.

use std::collections::BTreeMap;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::clock::Clock;

#[derive(Debug, Default)]
struct GateState {
    open: bool,
    offsets: BTreeMap<String, f64>,
}

/// Start gate shared through an `Arc`.
#[derive(Debug, Default)]
pub struct SyncGate {
    state: Mutex<GateState>,
    opened: Condvar,
}

impl SyncGate {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_open(&self) -> bool {
        self.lock().open
    }

    /// Open the gate, stamping `name` with its clock at the moment of release.
    pub fn open(&self, name: &str, clock: &dyn Clock) -> f64 {
        let mut state = self.lock();
        let stamp = clock.now();
        state.open = true;
        state.offsets.insert(name.to_string(), stamp);
        self.opened.notify_all();
        stamp
    }

    /// Block until the gate opens, then stamp `name` with its clock.
    pub fn wait(&self, name: &str, clock: &dyn Clock) -> f64 {
        let mut state = self.lock();
        while !state.open {
            state = self.opened.wait(state).unwrap_or_else(PoisonError::into_inner);
        }
        let stamp = clock.now();
        state.offsets.insert(name.to_string(), stamp);
        stamp
    }

    /// Like [`wait`](Self::wait) but gives up after `timeout`. Returns None on timeout.
    pub fn wait_timeout(&self, name: &str, clock: &dyn Clock, timeout: Duration) -> Option<f64> {
        let state = self.lock();
        let (mut state, result) = self
            .opened
            .wait_timeout_while(state, timeout, |s| !s.open)
            .unwrap_or_else(PoisonError::into_inner);
        if result.timed_out() && !state.open {
            return None;
        }
        let stamp = clock.now();
        state.offsets.insert(name.to_string(), stamp);
        Some(stamp)
    }

    /// Local clock readings collected so far, keyed by participant.
    pub fn offsets(&self) -> BTreeMap<String, f64> {
        self.lock().offsets.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_waiters_released_and_stamped() {
        let gate = Arc::new(SyncGate::new());
        let clock = ManualClock::new();
        clock.set(5.0);

        let handles: Vec<_> = ["poller", "logger"]
            .into_iter()
            .map(|name| {
                let gate = Arc::clone(&gate);
                let clock = clock.clone();
                thread::spawn(move || gate.wait(name, &clock))
            })
            .collect();

        gate.open("session", &clock);
        for h in handles {
            assert_eq!(h.join().unwrap(), 5.0);
        }
        let offsets = gate.offsets();
        assert_eq!(offsets.len(), 3);
        assert_eq!(offsets["session"], 5.0);
    }

    #[test]
    fn test_wait_timeout_when_closed() {
        let gate = SyncGate::new();
        let clock = ManualClock::new();
        assert!(gate.wait_timeout("late", &clock, Duration::from_millis(10)).is_none());
        gate.open("session", &clock);
        assert!(gate.wait_timeout("late", &clock, Duration::from_millis(10)).is_some());
    }
}
