use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::descriptor::Method;
use super::policy::RetryPolicy;
use crate::error::ConfigError;

/// Orchestrator-wide defaults, applied whenever a request descriptor leaves
/// the corresponding policy unset.
///
/// Durations are written in milliseconds when loaded from TOML:
///
/// ```
/// use pulith_request::OrchestratorConfig;
/// use std::time::Duration;
///
/// let config = OrchestratorConfig::from_toml_str(r#"
///     concurrency_limit = 6
///     cache_ttl = 60000
///
///     [retry]
///     max_attempts = 4
/// "#).unwrap();
///
/// assert_eq!(config.concurrency_limit, 6);
/// assert_eq!(config.cache_ttl, Duration::from_secs(60));
/// assert_eq!(config.retry.max_attempts, 4);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Maximum number of requests in flight through the scheduler.
    ///
    /// Default: 3
    pub concurrency_limit: usize,

    /// Time-to-live for cached responses without an explicit TTL.
    ///
    /// Default: 5 minutes
    #[serde(with = "duration_ms")]
    pub cache_ttl: Duration,

    /// Methods cached when a descriptor carries no cache policy.
    ///
    /// Default: `[GET]`
    pub cache_methods: Vec<Method>,

    pub retry: RetryPolicy,

    /// Per-attempt timeout. `None` leaves timing to the transport.
    #[serde(with = "option_duration_ms")]
    pub timeout: Option<Duration>,

    /// Share one execution between identical concurrent calls.
    ///
    /// Default: true
    pub dedupe_in_flight: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: 3,
            cache_ttl: Duration::from_secs(5 * 60),
            cache_methods: vec![Method::Get],
            retry: RetryPolicy::default(),
            timeout: None,
            dedupe_in_flight: true,
        }
    }
}

impl OrchestratorConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency_limit == 0 {
            return Err(ConfigError::Zero("concurrency_limit"));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Zero("retry.max_attempts"));
        }
        Ok(())
    }

    #[must_use]
    pub fn concurrency_limit(mut self, limit: usize) -> Self {
        self.concurrency_limit = limit;
        self
    }

    #[must_use]
    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    #[must_use]
    pub fn cache_methods(mut self, methods: Vec<Method>) -> Self {
        self.cache_methods = methods;
        self
    }

    #[must_use]
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn dedupe_in_flight(mut self, enabled: bool) -> Self {
        self.dedupe_in_flight = enabled;
        self
    }
}

pub(crate) mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

pub(crate) mod option_duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(d).map(|ms| ms.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::policy::Backoff;

    #[test]
    fn defaults() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.concurrency_limit, 3);
        assert_eq!(config.cache_ttl, Duration::from_secs(300));
        assert_eq!(config.cache_methods, vec![Method::Get]);
        assert_eq!(config.timeout, None);
        assert!(config.dedupe_in_flight);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn empty_document_yields_defaults() {
        let config = OrchestratorConfig::from_toml_str("").unwrap();
        assert_eq!(config, OrchestratorConfig::default());
    }

    #[test]
    fn parses_nested_policies() {
        let config = OrchestratorConfig::from_toml_str(
            r#"
            timeout = 1500
            cache_methods = ["GET", "HEAD"]
            dedupe_in_flight = false

            [retry]
            max_attempts = 5
            retry_on = ["server", "timeout"]

            [retry.backoff]
            kind = "exponential"
            base = 100
            max = 2000
            "#,
        )
        .unwrap();

        assert_eq!(config.timeout, Some(Duration::from_millis(1500)));
        assert_eq!(config.cache_methods, vec![Method::Get, Method::Head]);
        assert!(!config.dedupe_in_flight);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(
            config.retry.backoff,
            Backoff::Exponential {
                base: Duration::from_millis(100),
                max: Duration::from_secs(2),
            }
        );
        assert_eq!(config.retry.retry_statuses, vec![429]);
    }

    #[test]
    fn rejects_zero_limits() {
        let err = OrchestratorConfig::from_toml_str("concurrency_limit = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Zero("concurrency_limit")));

        let err = OrchestratorConfig::from_toml_str("[retry]\nmax_attempts = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Zero("retry.max_attempts")));
    }

    #[test]
    fn rejects_malformed_toml() {
        let err = OrchestratorConfig::from_toml_str("concurrency_limit = \"many\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn load_reports_missing_file() {
        let err = OrchestratorConfig::load("/nonexistent/pulith-request.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
