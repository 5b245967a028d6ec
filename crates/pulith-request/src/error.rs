//! Error types for pulith-request.

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::effects::TaskId;

/// Underlying cause of a failure, shared so classified errors stay cloneable.
pub type Cause = Arc<dyn std::error::Error + Send + Sync + 'static>;

pub type Result<T> = std::result::Result<T, ClassifiedError>;

/// The fixed taxonomy every transport failure is normalized into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// No response; the transport itself failed (DNS, connect, reset).
    Network,
    /// No response within the allotted time.
    Timeout,
    /// Response with status 401 or 403.
    Auth,
    /// Response with status >= 500.
    Server,
    /// Response with status in 400..500 other than 401/403.
    Client,
    /// The request was cancelled before a response arrived.
    Cancelled,
    Unknown,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Network => "network",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Auth => "auth",
            ErrorKind::Server => "server",
            ErrorKind::Client => "client",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// A failure normalized by [`classify`](crate::classify).
///
/// Callers never build one directly; every instance originates from a
/// [`TransportFailure`] passed through the classifier.
#[derive(Debug, Clone, Error)]
#[error("{kind} error{}: {message}", fmt_status(.status))]
pub struct ClassifiedError {
    kind: ErrorKind,
    status: Option<u16>,
    message: String,
    #[source]
    cause: Option<Cause>,
}

fn fmt_status(status: &Option<u16>) -> String {
    status.map(|s| format!(" (status {s})")).unwrap_or_default()
}

impl ClassifiedError {
    pub(crate) fn new(
        kind: ErrorKind,
        status: Option<u16>,
        message: String,
        cause: Option<Cause>,
    ) -> Self {
        Self { kind, status, message, cause }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// HTTP status of the failed response, if one was received.
    pub fn status(&self) -> Option<u16> {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn cause(&self) -> Option<&Cause> {
        self.cause.as_ref()
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == ErrorKind::Cancelled
    }
}

/// Raw failure reported by a [`Transport`](crate::Transport).
///
/// Carries just enough for the classifier: whether a response arrived (and
/// its status), whether the wait was cancelled or timed out, and the cause.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct TransportFailure {
    /// Status of the received response; `None` when no response arrived.
    pub status: Option<u16>,
    pub cancelled: bool,
    pub timed_out: bool,
    pub message: String,
    #[source]
    pub cause: Option<Cause>,
}

impl TransportFailure {
    /// A failure with no response and no cancellation or timeout marker.
    pub fn network(message: impl Into<String>) -> Self {
        Self {
            status: None,
            cancelled: false,
            timed_out: false,
            message: message.into(),
            cause: None,
        }
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self { cancelled: true, ..Self::network(message) }
    }

    pub fn timed_out(message: impl Into<String>) -> Self {
        Self { timed_out: true, ..Self::network(message) }
    }

    /// A response arrived but carried a failing status.
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self { status: Some(status), ..Self::network(message) }
    }

    #[must_use]
    pub fn with_cause(mut self, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Arc::new(cause));
        self
    }

    pub fn response_received(&self) -> bool {
        self.status.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("task {0} was removed from the queue before it started")]
    Removed(TaskId),
}

impl From<QueueError> for ClassifiedError {
    fn from(e: QueueError) -> Self {
        crate::core::classify(&TransportFailure::cancelled(e.to_string()))
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("`{0}` must be greater than zero")]
    Zero(&'static str),
}
