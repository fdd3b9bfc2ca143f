//! Shutdown latch shared between the operator stop path and the main loop
//!
//! The first request asks the loop to stop at its next tick boundary. A
//! second request while the first is still pending calls the abort hook,
//! for when the graceful path is stuck. Once the loop has stopped, further
//! requests are ignored.

use core::sync::atomic::{AtomicBool, Ordering};

/// Latch position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatchState {
    Armed,
    Triggered,
    /// Returned by [`ShutdownLatch::request`] only: a request arrived while
    /// already triggered. [`ShutdownLatch::state`] never reports it.
    Escalated,
    /// The loop has left; nothing is left to stop
    Stopped,
}

/// One-way stop flag with double-request escalation
pub struct ShutdownLatch {
    triggered: AtomicBool,
    stopped: AtomicBool,
    abort: fn() -> !,
}

impl ShutdownLatch {
    /// Create an armed latch. `abort` runs on a second request.
    pub const fn new(abort: fn() -> !) -> Self {
        Self {
            triggered: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            abort,
        }
    }

    /// Record a request and report the resulting state without aborting
    pub fn request(&self) -> LatchState {
        if self.is_stopped() {
            return LatchState::Stopped;
        }
        if self.triggered.swap(true, Ordering::AcqRel) {
            LatchState::Escalated
        } else {
            LatchState::Triggered
        }
    }

    /// Ask the loop to stop, or abort if it was already asked.
    pub fn request_shutdown(&self) {
        match self.request() {
            LatchState::Escalated => {
                log::error!("Shutdown requested twice, panic stop");
                (self.abort)();
            }
            LatchState::Stopped => log::info!("Shutdown requested after stop, ignored"),
            _ => log::info!("Shutdown requested, stopping after current tick"),
        }
    }

    /// Called by the loop once it has observed the request and left
    pub fn mark_stopped(&self) {
        self.triggered.store(true, Ordering::Release);
        self.stopped.store(true, Ordering::Release);
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::Acquire)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Armed, Triggered or Stopped
    pub fn state(&self) -> LatchState {
        if self.is_stopped() {
            LatchState::Stopped
        } else if self.is_triggered() {
            LatchState::Triggered
        } else {
            LatchState::Armed
        }
    }
}
