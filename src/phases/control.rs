//! Session control signals
//!
//! Kill and pause are set from outside the control loop (operator input,
//! hold rule, signal handlers) and sampled once per tick.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Cloneable cancellation token plus nested pause counter.
#[derive(Debug, Clone, Default)]
pub struct SessionControl {
    kill: Arc<AtomicBool>,
    pause_depth: Arc<AtomicUsize>,
}

impl SessionControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Finish the running trial through ITI and END, then stop.
    pub fn kill(&self) {
        self.kill.store(true, Ordering::SeqCst);
    }

    pub fn is_killed(&self) -> bool {
        self.kill.load(Ordering::SeqCst)
    }

    pub fn pause(&self) {
        self.pause_depth.fetch_add(1, Ordering::SeqCst);
    }

    /// Undo one `pause`. Extra calls are ignored.
    pub fn unpause(&self) {
        let _ = self
            .pause_depth
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |d| d.checked_sub(1));
    }

    pub fn pause_depth(&self) -> usize {
        self.pause_depth.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.pause_depth() > 0
    }

    /// Drop every outstanding pause.
    pub fn clear_pause(&self) {
        self.pause_depth.store(0, Ordering::SeqCst);
    }
}
