//! Reconnect delay computation.

use std::time::Duration;

use crate::config::BackoffConfig;

/// Computes the delay before each reconnect attempt.
///
/// Exponential growth capped at the configured ceiling, with optional 10%
/// jitter. The attempt counter resets the moment a subscription is
/// re-established, so a later outage starts again from the base delay.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    config: BackoffConfig,
    attempt: u32,
}

impl BackoffPolicy {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Delay for a given attempt number, without advancing the counter.
    ///
    /// Monotonically non-decreasing in the attempt number before jitter is
    /// applied; never exceeds the configured ceiling.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        // Exponent is clamped so a long outage cannot overflow the math.
        let growth = self.config.multiplier.powi(attempt.min(32) as i32);
        let mut ms = (self.config.base_delay_ms as f64 * growth).min(self.config.max_delay_ms as f64);

        if self.config.jitter {
            let jitter = fastrand::f64() * 0.1;
            ms = (ms * (1.0 + jitter)).min(self.config.max_delay_ms as f64);
        }

        Duration::from_millis(ms as u64)
    }

    /// Delay for the next retry; advances the attempt counter.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.delay_for_attempt(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    /// Number of consecutive failed attempts so far.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Reset after a session reaches the listening state.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}
