//! Time source for collect-timeout computation
//!
//! A small `Clock` abstraction is threaded through the executor rather than
//! calling `SystemTime::now()` inline, so timer-driven logic stays testable
//! for the one place a wall clock is needed: the fork/join collect timeout.

use std::time::{SystemTime, UNIX_EPOCH};

/// A source of the current wall-clock time, in milliseconds since epoch.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

/// Real wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
    }
}

/// Fixed clock for tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub i64);

impl Clock for FixedClock {
    fn now_ms(&self) -> i64 {
        self.0
    }
}
