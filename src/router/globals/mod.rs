//! Minimal global-state primitives used to guard one-time process
//! initialization.

use std::sync::atomic::{AtomicBool, Ordering};

/// A one-shot boolean flag, safe to use from a `static`.
pub struct Flag(AtomicBool);

impl Flag {
    pub const fn new() -> Self {
        Self(AtomicBool::new(false))
    }

    /// Returns the current value without modifying it.
    pub fn test(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn unset(&self) {
        self.0.store(false, Ordering::Release);
    }
}
