//! Time sources for block timestamps.
//!
//! The cache manager stamps blocks with creation and last-access times read
//! from a [`Clock`]. Replay runs and tests use [`SimClock`], a virtual clock
//! that only moves when told to, so TTL eviction is reproducible regardless
//! of host speed. Long-running embeddings use [`SystemClock`].

use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Millisecond time source shared by the cache manager and its callers.
pub trait Clock: Send + Sync + Debug {
    fn now_ms(&self) -> u64;
}

/// Virtual simulation clock.
///
/// Time is tracked in microseconds internally for precision, but most APIs
/// expose milliseconds (matching typical LLM latency scales). The counter is
/// atomic so one clock can be shared between the replay engine and the
/// cache manager behind an `Arc`.
#[derive(Debug, Default)]
pub struct SimClock {
    current_us: AtomicU64,
}

impl SimClock {
    /// Create a new clock starting at time zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a clock starting at a specific time in milliseconds.
    pub fn starting_at_ms(ms: u64) -> Self {
        Self {
            current_us: AtomicU64::new(ms * 1000),
        }
    }

    /// Current time in microseconds.
    pub fn now_us(&self) -> u64 {
        self.current_us.load(Ordering::Acquire)
    }

    /// Advance the clock to a specific time in milliseconds.
    ///
    /// # Panics
    ///
    /// Panics in debug mode if `ms` is in the past.
    pub fn advance_to_ms(&self, ms: u64) {
        let target_us = ms * 1000;
        let current_us = self.now_us();
        debug_assert!(
            target_us >= current_us,
            "Cannot move clock backwards: current={}us, target={}us",
            current_us,
            target_us,
        );
        self.current_us.fetch_max(target_us, Ordering::AcqRel);
    }

    /// Advance the clock by a duration in milliseconds.
    pub fn advance_by_ms(&self, delta_ms: u64) {
        self.current_us.fetch_add(delta_ms * 1000, Ordering::AcqRel);
    }

    /// Advance the clock by a duration in microseconds.
    pub fn advance_by_us(&self, delta_us: u64) {
        self.current_us.fetch_add(delta_us, Ordering::AcqRel);
    }

    /// Reset to time zero between benchmark runs.
    pub fn reset(&self) {
        self.current_us.store(0, Ordering::Release);
    }
}

impl Clock for SimClock {
    fn now_ms(&self) -> u64 {
        self.now_us() / 1000
    }
}

/// Wall clock measured from construction.
#[derive(Debug)]
pub struct SystemClock {
    start: Instant,
}

impl SystemClock {
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
    fn now_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}
