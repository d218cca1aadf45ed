//! Retry strategies for cloud calls.
//!
//! The storage client consults the strategy after every failed attempt:
//! input is the error and the attempt number (0-based), output is either a
//! delay to sleep before retrying or `None` to give up. Only errors the
//! error type itself marks retryable are ever offered to the strategy.

use crate::cloud::error::CloudError;
use std::time::Duration;

/// Pluggable retry policy
pub trait RetryStrategy: Send + Sync {
    /// Delay before the next attempt, or `None` to give up.
    /// `attempt` counts completed attempts, starting at 0.
    fn next_delay(&self, error: &CloudError, attempt: u32) -> Option<Duration>;
}

/// Bounded exponential backoff without jitter.
///
/// Deterministic on purpose: retry behavior is asserted exactly in tests, and
/// the per-env call volume is too low for synchronized-retry herding to
/// matter.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    /// Delay before the first retry
    pub initial: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Growth factor per attempt
    pub multiplier: f64,
    /// Total attempts allowed (first try included)
    pub max_attempts: u32,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        ExponentialBackoff {
            initial: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            max_attempts: 5,
        }
    }
}

impl ExponentialBackoff {
    pub fn new(initial: Duration, max_delay: Duration, max_attempts: u32) -> Self {
        ExponentialBackoff {
            initial,
            max_delay,
            multiplier: 2.0,
            max_attempts,
        }
    }

    /// Fast preset for tests
    pub fn test() -> Self {
        ExponentialBackoff {
            initial: Duration::from_millis(1),
            max_delay: Duration::from_millis(8),
            max_attempts: 4,
            multiplier: 2.0,
        }
    }
}

impl RetryStrategy for ExponentialBackoff {
    fn next_delay(&self, error: &CloudError, attempt: u32) -> Option<Duration> {
        if !error.is_retryable() {
            return None;
        }
        // attempt is 0-based; attempt == max_attempts - 1 was the last one
        if attempt + 1 >= self.max_attempts {
            return None;
        }
        let scaled = self.initial.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let capped = scaled.min(self.max_delay.as_secs_f64());
        Some(Duration::from_secs_f64(capped))
    }
}

/// Strategy that never retries; used by tests that assert single-shot
/// behavior.
#[derive(Debug, Clone, Default)]
pub struct NoRetry;

impl RetryStrategy for NoRetry {
    fn next_delay(&self, _error: &CloudError, _attempt: u32) -> Option<Duration> {
        None
    }
}
