use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::policy::{CachePolicy, QueuePolicy, RateShaping, RetryPolicy};

/// HTTP method of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    #[default]
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
    Options,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
            Method::Options => "OPTIONS",
        }
    }

    /// Methods that never mutate server state.
    pub fn is_safe(&self) -> bool {
        matches!(self, Method::Get | Method::Head | Method::Options)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything the orchestrator needs to know about one logical request.
///
/// Descriptors are built with the fluent setters below and treated as
/// immutable once handed to [`Orchestrator::execute`](crate::Orchestrator::execute).
/// Unset policies fall back to the orchestrator's
/// [`OrchestratorConfig`](crate::OrchestratorConfig).
///
/// # Examples
///
/// ```
/// use pulith_request::{Method, RequestDescriptor};
/// use std::time::Duration;
///
/// let request = RequestDescriptor::get("https://api.example.com/items")
///     .query("page", "2")
///     .priority(5)
///     .cache_ttl(Duration::from_secs(30));
///
/// assert_eq!(request.method, Method::Get);
/// assert_eq!(request.priority_value(), 5);
/// ```
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RequestDescriptor {
    pub method: Method,

    /// Absolute or service-relative address of the resource.
    pub target: String,

    /// Query parameters in insertion order; ordering does not affect the fingerprint.
    pub query: Vec<(String, String)>,

    pub body: Option<serde_json::Value>,

    /// Headers sent with every attempt. Not part of the fingerprint.
    pub headers: Vec<(String, String)>,

    /// Explicit cache key, used instead of the computed fingerprint.
    pub cache_key: Option<String>,

    pub cache: Option<CachePolicy>,

    pub retry: Option<RetryPolicy>,

    pub queue: Option<QueuePolicy>,

    pub rate: Option<RateShaping>,

    /// Per-attempt timeout, overriding the configured default.
    pub timeout: Option<Duration>,

    /// Cache keys invalidated once this request succeeds.
    pub invalidates: Vec<String>,
}

impl RequestDescriptor {
    pub fn new(method: Method, target: impl Into<String>) -> Self {
        Self {
            method,
            target: target.into(),
            ..Self::default()
        }
    }

    pub fn get(target: impl Into<String>) -> Self {
        Self::new(Method::Get, target)
    }

    pub fn post(target: impl Into<String>) -> Self {
        Self::new(Method::Post, target)
    }

    pub fn put(target: impl Into<String>) -> Self {
        Self::new(Method::Put, target)
    }

    pub fn patch(target: impl Into<String>) -> Self {
        Self::new(Method::Patch, target)
    }

    pub fn delete(target: impl Into<String>) -> Self {
        Self::new(Method::Delete, target)
    }

    #[must_use]
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    #[must_use]
    pub fn body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    #[must_use]
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    #[must_use]
    pub fn cache_key(mut self, key: impl Into<String>) -> Self {
        self.cache_key = Some(key.into());
        self
    }

    #[must_use]
    pub fn cache(mut self, policy: CachePolicy) -> Self {
        self.cache = Some(policy);
        self
    }

    /// Enable caching with the given time-to-live.
    #[must_use]
    pub fn cache_ttl(self, ttl: Duration) -> Self {
        self.cache(CachePolicy::enabled(ttl))
    }

    #[must_use]
    pub fn no_cache(self) -> Self {
        self.cache(CachePolicy::disabled())
    }

    #[must_use]
    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    /// Queue the request with the given priority (higher runs first).
    #[must_use]
    pub fn priority(mut self, priority: i32) -> Self {
        self.queue = Some(QueuePolicy { enabled: true, priority });
        self
    }

    /// Bypass the scheduler and send immediately.
    #[must_use]
    pub fn unqueued(mut self) -> Self {
        self.queue = Some(QueuePolicy { enabled: false, priority: 0 });
        self
    }

    #[must_use]
    pub fn debounce(mut self, wait: Duration, leading: bool) -> Self {
        self.rate = Some(RateShaping::Debounce { wait, leading });
        self
    }

    #[must_use]
    pub fn throttle(mut self, wait: Duration, trailing: bool) -> Self {
        self.rate = Some(RateShaping::Throttle { wait, trailing });
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn invalidates(mut self, key: impl Into<String>) -> Self {
        self.invalidates.push(key.into());
        self
    }

    /// Scheduling priority; 0 when no queue policy is set.
    pub fn priority_value(&self) -> i32 {
        self.queue.map(|q| q.priority).unwrap_or_default()
    }
}
