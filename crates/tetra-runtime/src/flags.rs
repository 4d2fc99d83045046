//! The two boolean signals shared across the worker boundary.
//!
//! | Flag | Set | Cleared |
//! |---|---|---|
//! | pause gate | worker proceeds | worker blocks at its next pause check |
//! | stop flag | worker exits at its next stop check | worker keeps going |
//!
//! The pause gate is a `Mutex<bool>` + `Condvar`: a paused worker sleeps on
//! the condition variable and costs nothing until the gate is set again.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

// ─────────────────────────────────────────────────────────────────────────────
// PauseGate
// ─────────────────────────────────────────────────────────────────────────────

/// Blocking gate: open ("set") lets the worker through, closed blocks it.
///
/// # Example
///
/// ```
/// use tetra_runtime::flags::PauseGate;
///
/// let gate = PauseGate::new();
/// assert!(gate.is_set());
/// assert!(!gate.wait()); // open gate: returns immediately
///
/// gate.clear();
/// assert!(!gate.is_set());
/// ```
#[derive(Debug)]
pub struct PauseGate {
    open: Mutex<bool>,
    cv: Condvar,
}

impl Default for PauseGate {
    fn default() -> Self {
        Self::new()
    }
}

impl PauseGate {
    /// A new gate starts open.
    pub fn new() -> Self {
        Self {
            open: Mutex::new(true),
            cv: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, bool> {
        self.open.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open the gate and wake every waiter.
    pub fn set(&self) {
        *self.lock() = true;
        self.cv.notify_all();
    }

    /// Close the gate.
    pub fn clear(&self) {
        *self.lock() = false;
    }

    pub fn is_set(&self) -> bool {
        *self.lock()
    }

    /// Block until the gate is open.
    ///
    /// Returns `true` if the caller actually had to wait.
    pub fn wait(&self) -> bool {
        let mut open = self.lock();
        if *open {
            return false;
        }
        while !*open {
            open = self.cv.wait(open).unwrap_or_else(PoisonError::into_inner);
        }
        true
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ControlFlags
// ─────────────────────────────────────────────────────────────────────────────

/// Pause gate plus stop flag.
#[derive(Debug, Default)]
pub struct ControlFlags {
    pub pause: PauseGate,
    stop: AtomicBool,
}

impl ControlFlags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn clear_stop(&self) {
        self.stop.store(false, Ordering::SeqCst);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }
}
