//! Retry policy with exponential backoff.
//!
//! When an action fails transiently the dispatcher waits before the next
//! attempt so the external platform is not hammered. The wait doubles (by
//! default) on every retry and is capped, but a platform-supplied
//! `retry_after` always wins when it is longer.

use std::time::Duration;

/// Retry configuration for one INVOKE.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first call (>= 1).
    pub max_attempts: u32,
    /// Wait before the first retry.
    pub initial_backoff: Duration,
    /// Upper bound for the computed wait.
    pub max_backoff: Duration,
    /// Growth factor between retries.
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Create a policy with custom values.
    pub fn new(max_attempts: u32, initial_backoff: Duration, max_backoff: Duration, multiplier: f64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff,
            max_backoff,
            multiplier,
        }
    }

    /// Policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Whether another attempt is allowed after `attempts` calls.
    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    /// Wait before retry number `retry` (1 = first retry).
    ///
    /// The delay is the maximum of:
    /// - `initial * multiplier^(retry-1)`, capped at `max_backoff`
    /// - the platform's suggested `retry_after`
    pub fn delay_for(&self, retry: u32, retry_after: Option<Duration>) -> Duration {
        let exponent = retry.saturating_sub(1).min(63) as i32;
        let factor = self.multiplier.max(1.0).powi(exponent);
        let secs = self.initial_backoff.as_secs_f64() * factor;

        let computed = if secs.is_finite() && secs < self.max_backoff.as_secs_f64() {
            Duration::from_secs_f64(secs)
        } else {
            self.max_backoff
        };

        match retry_after {
            Some(after) => computed.max(after),
            None => computed,
        }
    }
}
