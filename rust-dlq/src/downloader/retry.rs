//! Retry policy value object.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Fixed-delay retry policy.
///
/// The delay is deliberately flat rather than exponential: the external
/// tool already handles transient network hiccups internally, and a
/// predictable wait between whole-process re-invocations is easier to
/// reason about for short-lived failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries allowed after the first failed attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Delay between attempts in milliseconds.
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
}

fn default_max_retries() -> u32 {
    5
}

fn default_delay_ms() -> u64 {
    3000
}

impl RetryPolicy {
    /// Create a policy with custom max retries and the default delay.
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    /// Create a policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Whether another attempt is allowed after `attempts_done` attempts.
    ///
    /// A job's total attempt budget is `max_retries + 1`.
    pub fn should_retry(&self, attempts_done: u32) -> bool {
        attempts_done <= self.max_retries
    }

    /// The fixed wait between attempts.
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    /// Total attempts a job may consume.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            delay_ms: default_delay_ms(),
        }
    }
}
