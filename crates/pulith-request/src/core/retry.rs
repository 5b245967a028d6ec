//! Retry decisions.
//!
//! Both functions are pure: the orchestrator owns the attempt counter, the
//! sleeping and the resend.

use std::time::Duration;

use crate::data::{Backoff, RetryPolicy};
use crate::error::{ClassifiedError, ErrorKind};

/// Calculate the delay before a retry attempt using exponential backoff.
///
/// The delay formula is: `base * 2^retry_count`
///
/// # Arguments
///
/// * `retry_count` - The current retry number (0-indexed: 0 = first retry)
/// * `base` - The base delay duration
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use pulith_request::retry_delay;
///
/// // First retry: base * 2^0 = base
/// assert_eq!(retry_delay(0, Duration::from_millis(100)), Duration::from_millis(100));
///
/// // Second retry: base * 2^1 = base * 2
/// assert_eq!(retry_delay(1, Duration::from_millis(100)), Duration::from_millis(200));
///
/// // Third retry: base * 2^2 = base * 4
/// assert_eq!(retry_delay(2, Duration::from_millis(100)), Duration::from_millis(400));
/// ```
pub fn retry_delay(retry_count: u32, base: Duration) -> Duration {
    // Use saturating_pow to prevent overflow
    let multiplier = 2_u32.saturating_pow(retry_count);

    // Use saturating_mul to prevent Duration overflow
    base.saturating_mul(multiplier)
}

impl RetryPolicy {
    /// Whether a request whose `attempt`-th try (1-based) failed with `error`
    /// should be sent again.
    ///
    /// `Auth` and `Cancelled` are never retried. `Client` errors are retried
    /// only when their status is listed in `retry_statuses`.
    pub fn should_retry(&self, error: &ClassifiedError, attempt: u32) -> bool {
        if attempt >= self.max_attempts {
            return false;
        }

        let status_listed = error.status().is_some_and(|s| self.retry_statuses.contains(&s));
        match error.kind() {
            ErrorKind::Auth | ErrorKind::Cancelled => false,
            ErrorKind::Client => status_listed,
            kind => status_listed || self.retry_on.contains(&kind),
        }
    }

    /// Delay to wait after the `attempt`-th try (1-based) failed.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Constant { delay } => delay,
            Backoff::Exponential { base, max } => {
                retry_delay(attempt.saturating_sub(1), base).min(max)
            }
        }
    }
}
