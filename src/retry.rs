//! Retry Strategies
//!
//! Policies deciding how long a contended [`obtain`](crate::Locker::obtain)
//! waits before claiming the key again.

use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Attempt number from which the exponential formula stops doubling.
const EXPONENT_CUTOFF: u64 = 22;

/// Produces successive waits between acquisition attempts.
///
/// Implementations are shared between concurrent `obtain` calls, so
/// `next_backoff` takes `&self` and any state must be synchronized internally.
pub trait RetryStrategy: Send + Sync + Debug {
    /// Returns the next wait, or `None` to stop retrying immediately.
    fn next_backoff(&self) -> Option<Duration>;
}

/// Fixed interval retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinearBackoff {
    interval: Duration,
}

impl LinearBackoff {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl RetryStrategy for LinearBackoff {
    fn next_backoff(&self) -> Option<Duration> {
        Some(self.interval)
    }
}

/// Never retries. This is the default strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NoRetry;

impl RetryStrategy for NoRetry {
    fn next_backoff(&self) -> Option<Duration> {
        None
    }
}

/// Exponential retry: attempt `n` waits `2^(n+1)` milliseconds, clamped into
/// `[min, max]`.
///
/// The attempt counter lives in the strategy instance and is advanced
/// atomically, so every `obtain` sharing one instance advances the same
/// sequence. A `max` of zero disables the upper clamp.
#[derive(Debug)]
pub struct ExponentialBackoff {
    attempts: AtomicU64,
    min: Duration,
    max: Duration,
}

impl ExponentialBackoff {
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            attempts: AtomicU64::new(0),
            min,
            max,
        }
    }

    /// Number of backoffs handed out so far.
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::Relaxed)
    }

    fn raw_backoff(attempt: u64) -> Duration {
        let exponent = attempt.min(EXPONENT_CUTOFF);
        Duration::from_millis(2u64 << exponent)
    }
}

impl RetryStrategy for ExponentialBackoff {
    fn next_backoff(&self) -> Option<Duration> {
        let attempt = self.attempts.fetch_add(1, Ordering::Relaxed) + 1;
        let backoff = Self::raw_backoff(attempt);

        if backoff < self.min {
            Some(self.min)
        } else if !self.max.is_zero() && backoff > self.max {
            Some(self.max)
        } else {
            Some(backoff)
        }
    }
}

/// Shorthand for a shared [`LinearBackoff`].
pub fn linear(interval: Duration) -> Arc<dyn RetryStrategy> {
    Arc::new(LinearBackoff::new(interval))
}

/// Shorthand for a shared [`ExponentialBackoff`].
pub fn exponential(min: Duration, max: Duration) -> Arc<dyn RetryStrategy> {
    Arc::new(ExponentialBackoff::new(min, max))
}

/// Shorthand for a shared [`NoRetry`].
pub fn no_retry() -> Arc<dyn RetryStrategy> {
    Arc::new(NoRetry)
}
