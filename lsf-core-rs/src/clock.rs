//! Millisecond clocks used to stamp blob modifications
//!
//! Controllers never compare each other's timestamps directly. A timestamp
//! only ever leaves the process as an age (`now - timestamp`), so a
//! process-local monotonic clock is sufficient.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Source of monotonic milliseconds. Zero is reserved for "never modified".
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

/// Milliseconds since the clock was created, starting at 1
#[derive(Debug)]
pub struct MonotonicClock {
    start: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64 + 1
    }
}

/// Manually advanced clock for tests and simulations
#[derive(Debug)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: AtomicU64::new(start_ms),
        }
    }

    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }

    pub fn set(&self, ms: u64) {
        self.now.store(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Age of a modification stamped at `timestamp`. A zero timestamp marks a
/// synthetic first-boot blob, which is reported as infinitely old.
pub fn age_since(clock: &dyn Clock, timestamp: u64) -> u64 {
    if timestamp == 0 {
        u64::MAX
    } else {
        clock.now_ms().saturating_sub(timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monotonic_never_zero() {
        let clock = MonotonicClock::new();
        assert!(clock.now_ms() >= 1);
    }

    #[test]
    fn test_age_of_initial_state_is_max() {
        let clock = ManualClock::new(5_000);
        assert_eq!(age_since(&clock, 0), u64::MAX);
        assert_eq!(age_since(&clock, 4_000), 1_000);
        clock.advance(500);
        assert_eq!(age_since(&clock, 4_000), 1_500);
    }
}
