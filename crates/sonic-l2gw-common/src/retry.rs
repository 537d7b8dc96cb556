//! Retry backoff for failed jobs.

use std::time::Duration;

/// Backoff policy for job retries.
///
/// The delay before a retry is `base_delay * multiplier / retries_left`, so the
/// wait grows as the remaining budget shrinks: the last retries are the most
/// spaced out. With the defaults (100ms, x10) a job with three attempts waits
/// 500ms and then 1s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Base delay unit.
    pub base_delay: Duration,
    /// Scale applied before dividing by the remaining budget.
    pub multiplier: u32,
}

impl RetryPolicy {
    /// Default base delay.
    pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(100);

    /// Default multiplier.
    pub const DEFAULT_MULTIPLIER: u32 = 10;

    /// Creates a policy.
    pub const fn new(base_delay: Duration, multiplier: u32) -> Self {
        Self {
            base_delay,
            multiplier,
        }
    }

    /// Returns the delay before the next attempt given the remaining budget.
    ///
    /// A budget of zero is treated as one.
    pub fn delay_for(&self, retries_left: u32) -> Duration {
        let divisor = retries_left.max(1);
        self.base_delay.saturating_mul(self.multiplier) / divisor
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Self::DEFAULT_BASE_DELAY, Self::DEFAULT_MULTIPLIER)
    }
}
