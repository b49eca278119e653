//! Monotonic millisecond clock
//!
//! The mesh only ever compares timestamps by wrapping subtraction, so a
//! 32-bit millisecond counter (wrapping after ~49 days) is sufficient.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Source of monotonic milliseconds
pub trait Clock: Send + Sync {
    /// Milliseconds since an arbitrary epoch, wrapping at `u32::MAX`
    fn monotonic_ms(&self) -> u32;
}

/// Milliseconds elapsed from `earlier` to `now`, tolerant of counter wrap
pub fn elapsed_ms(now: u32, earlier: u32) -> u32 {
    now.wrapping_sub(earlier)
}

/// Host clock backed by [`Instant`]
#[derive(Debug, Clone)]
pub struct SystemClock {
    start: Instant,
}

impl SystemClock {
    /// Start counting from now
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn monotonic_ms(&self) -> u32 {
        // Truncation is the wrap
        self.start.elapsed().as_millis() as u32
    }
}

/// Manually driven clock shared between clones
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU32>,
}

impl ManualClock {
    /// Create a clock reading `start_ms`
    pub fn new(start_ms: u32) -> Self {
        Self {
            now: Arc::new(AtomicU32::new(start_ms)),
        }
    }

    /// Set the current time
    pub fn set(&self, ms: u32) {
        self.now.store(ms, Ordering::SeqCst);
    }

    /// Move the clock forward, wrapping like the hardware counter
    pub fn advance(&self, ms: u32) -> u32 {
        let prev = self.now.fetch_add(ms, Ordering::SeqCst);
        prev.wrapping_add(ms)
    }
}

impl Clock for ManualClock {
    fn monotonic_ms(&self) -> u32 {
        self.now.load(Ordering::SeqCst)
    }
}
