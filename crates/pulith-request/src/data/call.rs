use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::progress::{Direction, ProgressSnapshot};
use crate::error::ClassifiedError;

pub type ProgressCallback = Arc<dyn Fn(Direction, &ProgressSnapshot) + Send + Sync>;
pub type RetryCallback = Arc<dyn Fn(&RetryEvent) + Send + Sync>;

/// Emitted before the orchestrator waits out a retry delay.
#[derive(Debug, Clone)]
pub struct RetryEvent {
    /// Number of the attempt that just failed (1-based).
    pub attempt: u32,
    pub error: ClassifiedError,
    pub delay: Duration,
}

/// Per-call hooks that are not part of the request's identity.
///
/// # Examples
///
/// ```
/// use pulith_request::CallOptions;
/// use std::sync::Arc;
/// use tokio_util::sync::CancellationToken;
///
/// let token = CancellationToken::new();
/// let options = CallOptions::default()
///     .cancel(token.clone())
///     .on_progress(Arc::new(|direction, snapshot| {
///         println!("{direction}: {:.0}%", snapshot.progress_percent);
///     }));
/// ```
#[derive(Clone, Default)]
pub struct CallOptions {
    /// Cancels the call wherever it currently is: rate shaping, the wait
    /// list, an in-flight attempt or a retry delay.
    pub cancel: Option<CancellationToken>,

    /// Invoked for every byte-counter update the transport reports.
    pub on_progress: Option<ProgressCallback>,

    /// Invoked once per scheduled retry.
    pub on_retry: Option<RetryCallback>,
}

impl fmt::Debug for CallOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallOptions")
            .field("cancel", &self.cancel)
            .field("on_progress", &self.on_progress.as_ref().map(|_| "{ ... }"))
            .field("on_retry", &self.on_retry.as_ref().map(|_| "{ ... }"))
            .finish()
    }
}

impl CallOptions {
    #[must_use]
    pub fn cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    #[must_use]
    pub fn on_progress(mut self, callback: ProgressCallback) -> Self {
        self.on_progress = Some(callback);
        self
    }

    #[must_use]
    pub fn on_retry(mut self, callback: RetryCallback) -> Self {
        self.on_retry = Some(callback);
        self
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled)
    }
}
