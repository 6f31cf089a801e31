//! Retry policies for the orchestration loop.
//!
//! The orchestrator asks a `RetryPolicy` three things: how many attempts it
//! may make, how long to wait after a given attempt, and whether a given
//! outcome deserves another try. Swapping the policy changes backoff shape
//! without touching the loop.

use std::fmt;
use std::time::Duration;

use crate::result::AttemptOutcome;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(2);

pub trait RetryPolicy: Send + Sync + fmt::Debug {
    /// Upper bound on attempts, including the first one.
    fn max_attempts(&self) -> u32;

    /// Wait after attempt `attempt` (1-based) failed.
    fn delay(&self, attempt: u32) -> Duration;

    fn should_retry(&self, attempt: u32, outcome: &AttemptOutcome) -> bool {
        attempt < self.max_attempts() && outcome.is_retryable()
    }
}

/// Same delay after every failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedBackoff {
    max_attempts: u32,
    delay: Duration,
}

impl FixedBackoff {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }
}

impl Default for FixedBackoff {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS, DEFAULT_BACKOFF)
    }
}

impl RetryPolicy for FixedBackoff {
    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    fn delay(&self, _attempt: u32) -> Duration {
        self.delay
    }
}

/// `base * factor^(attempt - 1)`, capped at `max_delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExponentialBackoff {
    max_attempts: u32,
    base: Duration,
    factor: u32,
    max_delay: Duration,
}

impl ExponentialBackoff {
    pub fn new(max_attempts: u32, base: Duration, factor: u32, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base,
            factor: factor.max(1),
            max_delay,
        }
    }
}

impl RetryPolicy for ExponentialBackoff {
    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let multiplier = self.factor.checked_pow(exponent).unwrap_or(u32::MAX);
        self.base
            .checked_mul(multiplier)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}
