use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::config::{duration_ms, option_duration_ms};
use crate::error::ErrorKind;

/// Whether and for how long a successful response is cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachePolicy {
    pub enabled: bool,

    /// Time-to-live; `None` uses the configured default.
    #[serde(default, with = "option_duration_ms")]
    pub ttl: Option<Duration>,
}

impl CachePolicy {
    pub fn enabled(ttl: Duration) -> Self {
        Self { enabled: true, ttl: Some(ttl) }
    }

    pub fn disabled() -> Self {
        Self { enabled: false, ttl: None }
    }
}

/// Whether a request goes through the scheduler, and at which priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuePolicy {
    pub enabled: bool,

    /// Higher values are admitted first.
    pub priority: i32,
}

impl Default for QueuePolicy {
    fn default() -> Self {
        Self { enabled: true, priority: 0 }
    }
}

/// Call-rate shaping applied before a request reaches the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum RateShaping {
    /// Collapse calls arriving within `wait` of each other into one.
    Debounce {
        #[serde(with = "duration_ms")]
        wait: Duration,
        #[serde(default)]
        leading: bool,
    },

    /// Run at most one call per `wait` window.
    Throttle {
        #[serde(with = "duration_ms")]
        wait: Duration,
        #[serde(default = "default_trailing")]
        trailing: bool,
    },
}

fn default_trailing() -> bool {
    true
}

/// Delay schedule between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backoff {
    /// The same delay before every retry.
    Constant {
        #[serde(with = "duration_ms")]
        delay: Duration,
    },

    /// `base * 2^(attempt - 1)`, capped at `max`.
    Exponential {
        #[serde(with = "duration_ms")]
        base: Duration,
        #[serde(with = "duration_ms")]
        max: Duration,
    },
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::Constant { delay: Duration::from_millis(1000) }
    }
}

/// When to resend a failed request and how long to wait first.
///
/// The decision functions live in [`core::retry`](crate::core::retry); this
/// type only carries the parameters.
///
/// # Examples
///
/// ```
/// use pulith_request::{Backoff, RetryPolicy};
/// use std::time::Duration;
///
/// let policy = RetryPolicy::default()
///     .max_attempts(5)
///     .backoff(Backoff::Exponential {
///         base: Duration::from_millis(200),
///         max: Duration::from_secs(5),
///     });
///
/// assert_eq!(policy.delay_for(1), Duration::from_millis(200));
/// assert_eq!(policy.delay_for(3), Duration::from_millis(800));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    ///
    /// Default: 3
    pub max_attempts: u32,

    pub backoff: Backoff,

    /// Error kinds that are retried.
    ///
    /// Default: `[Server]`
    pub retry_on: Vec<ErrorKind>,

    /// Statuses retried regardless of kind.
    ///
    /// Default: `[429]`
    pub retry_statuses: Vec<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::default(),
            retry_on: vec![ErrorKind::Server],
            retry_statuses: vec![429],
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self { max_attempts: 1, ..Self::default() }
    }

    #[must_use]
    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    #[must_use]
    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    #[must_use]
    pub fn constant_delay(self, delay: Duration) -> Self {
        self.backoff(Backoff::Constant { delay })
    }

    #[must_use]
    pub fn retry_on(mut self, kind: ErrorKind) -> Self {
        if !self.retry_on.contains(&kind) {
            self.retry_on.push(kind);
        }
        self
    }

    #[must_use]
    pub fn retry_status(mut self, status: u16) -> Self {
        if !self.retry_statuses.contains(&status) {
            self.retry_statuses.push(status);
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.backoff, Backoff::Constant { delay: Duration::from_secs(1) });
        assert_eq!(policy.retry_on, vec![ErrorKind::Server]);
        assert_eq!(policy.retry_statuses, vec![429]);
        assert_eq!(QueuePolicy::default(), QueuePolicy { enabled: true, priority: 0 });
    }

    #[test]
    fn retry_on_does_not_duplicate() {
        let policy = RetryPolicy::default()
            .retry_on(ErrorKind::Server)
            .retry_on(ErrorKind::Timeout)
            .retry_status(429)
            .retry_status(503);
        assert_eq!(policy.retry_on, vec![ErrorKind::Server, ErrorKind::Timeout]);
        assert_eq!(policy.retry_statuses, vec![429, 503]);
    }

    #[test]
    fn rate_shaping_deserializes_from_toml() {
        #[derive(Deserialize)]
        struct Wrapper {
            rate: RateShaping,
        }

        let parsed: Wrapper = toml::from_str(
            r#"
            [rate]
            mode = "throttle"
            wait = 250
            "#,
        )
        .unwrap();
        assert_eq!(
            parsed.rate,
            RateShaping::Throttle { wait: Duration::from_millis(250), trailing: true }
        );
    }
}
