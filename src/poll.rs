//! Condition polling against eventually-consistent remote state.
//!
//! Labels and comments are mutated asynchronously by workflows, so every
//! scenario check is "ask again until true or out of time". The deadline is
//! measured from a monotonic start instant, so a slow predicate eats into the
//! window rather than extending it.

use std::thread;
use std::time::{Duration, Instant};

use crate::config::TestingConfig;
use crate::error::Result;

/// Polls `condition` until it returns true or `timeout` elapses.
///
/// The condition is checked once before any sleep, so an already-true
/// condition returns immediately. Between checks the thread sleeps for
/// `interval`, clamped to the time left before the deadline. Returns `false`
/// on timeout; timing out is never an error.
pub fn poll_until<F>(mut condition: F, timeout: Duration, interval: Duration) -> bool
where
    F: FnMut() -> bool,
{
    let start = Instant::now();
    let mut checks = 0u32;

    loop {
        checks += 1;
        if condition() {
            tracing::debug!(checks, elapsed = ?start.elapsed(), "condition met");
            return true;
        }

        let elapsed = start.elapsed();
        if elapsed >= timeout {
            tracing::debug!(checks, ?timeout, "condition not met before timeout");
            return false;
        }

        thread::sleep(interval.min(timeout - elapsed));
    }
}

/// Like [`poll_until`] but with a fallible condition.
///
/// An error from the condition stops polling and is returned as-is.
pub fn try_poll_until<F>(mut condition: F, timeout: Duration, interval: Duration) -> Result<bool>
where
    F: FnMut() -> Result<bool>,
{
    let start = Instant::now();

    loop {
        if condition()? {
            return Ok(true);
        }

        let elapsed = start.elapsed();
        if elapsed >= timeout {
            return Ok(false);
        }

        thread::sleep(interval.min(timeout - elapsed));
    }
}

/// A timeout/interval pair used for a family of checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    /// Maximum wall-clock time to wait.
    pub timeout: Duration,
    /// Constant delay between checks.
    pub interval: Duration,
}

impl PollSettings {
    /// Creates settings from explicit durations.
    pub fn new(timeout: Duration, interval: Duration) -> Self {
        Self { timeout, interval }
    }

    /// Creates settings from whole seconds.
    pub fn secs(timeout: u64, interval: u64) -> Self {
        Self::new(Duration::from_secs(timeout), Duration::from_secs(interval))
    }

    /// Uses the configured `TEST_TIMEOUT` / `TEST_POLL_INTERVAL`.
    pub fn from_config(config: &TestingConfig) -> Self {
        Self::new(config.test_timeout, config.poll_interval)
    }

    /// Returns a copy with a different timeout.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        Self { timeout, ..self }
    }

    /// Returns a copy with a different interval.
    pub fn with_interval(self, interval: Duration) -> Self {
        Self { interval, ..self }
    }

    /// Polls `condition` with these settings.
    pub fn until<F>(&self, condition: F) -> bool
    where
        F: FnMut() -> bool,
    {
        poll_until(condition, self.timeout, self.interval)
    }

    /// Polls a fallible `condition` with these settings.
    pub fn try_until<F>(&self, condition: F) -> Result<bool>
    where
        F: FnMut() -> Result<bool>,
    {
        try_poll_until(condition, self.timeout, self.interval)
    }
}

impl Default for PollSettings {
    /// The 120s / 5s window most keeper scenarios use.
    fn default() -> Self {
        Self::secs(120, 5)
    }
}
