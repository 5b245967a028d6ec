use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, WeakShared};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::cache::CacheStore;
use super::rate::{Debounced, RequestFn, Throttled, WeakDebounced, WeakThrottled};
use super::scheduler::Scheduler;
use super::transport::{SampleCallback, SendOptions, Transport};
use crate::core::{ProgressMonitor, classify, fingerprint};
use crate::data::{
    CachePolicy, CallOptions, Direction, OrchestratorConfig, ProgressCallback, ProgressSample,
    QueuePolicy, RateShaping, RequestDescriptor, RetryEvent,
};
use crate::error::{ClassifiedError, Result, TransportFailure};

type ShapedCall = (RequestDescriptor, CallOptions);

/// Composes caching, rate shaping, scheduling, transport and retry.
///
/// Each call moves through: cache check, then (on a miss) rate shaping, the
/// scheduler's wait list, the transport, and on failure the retry decision,
/// which either queues the request again or surfaces one [`ClassifiedError`].
/// Successful responses are written to the cache when caching applies.
///
/// The cache store and scheduler are ordinary values owned by the
/// orchestrator (or injected with [`with_parts`](Self::with_parts)), so
/// independent orchestrators never share state. Cloning is cheap and yields
/// a handle to the same instance.
pub struct Orchestrator<T: Transport> {
    inner: Arc<Inner<T>>,
}

struct Inner<T: Transport> {
    transport: T,
    config: OrchestratorConfig,
    cache: Arc<CacheStore<T::Response>>,
    scheduler: Scheduler,
    shapers: Mutex<HashMap<String, WeakShaper<T::Response>>>,
    in_flight: Mutex<HashMap<String, InFlight<T::Response>>>,
    next_call: AtomicU64,
}

/// A de-duplicated call, held weakly so that it is dropped, releasing its
/// scheduler slot, once every caller awaiting it has gone.
struct InFlight<V> {
    id: u64,
    call: WeakShared<BoxFuture<'static, Result<V>>>,
}

/// Unregisters a de-duplicated call when it finishes or is dropped.
struct InFlightGuard<T: Transport> {
    inner: Arc<Inner<T>>,
    key: String,
    id: u64,
}

impl<T: Transport> Drop for InFlightGuard<T> {
    fn drop(&mut self) {
        let mut calls = self.inner.in_flight.lock();
        if calls.get(&self.key).is_some_and(|entry| entry.id == self.id) {
            calls.remove(&self.key);
        }
    }
}

impl<T: Transport> Clone for Orchestrator<T> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<T: Transport> fmt::Debug for Orchestrator<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.inner.config)
            .field("cache", &self.inner.cache)
            .field("scheduler", &self.inner.scheduler)
            .finish_non_exhaustive()
    }
}

impl<T: Transport> Orchestrator<T> {
    pub fn new(transport: T, config: OrchestratorConfig) -> Self {
        let cache = Arc::new(CacheStore::with_default_ttl(config.cache_ttl));
        let scheduler = Scheduler::new(config.concurrency_limit);
        Self::with_parts(transport, config, cache, scheduler)
    }

    /// Build around an existing cache store and scheduler, which may be
    /// shared with other orchestrators.
    pub fn with_parts(
        transport: T,
        config: OrchestratorConfig,
        cache: Arc<CacheStore<T::Response>>,
        scheduler: Scheduler,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                config,
                cache,
                scheduler,
                shapers: Mutex::new(HashMap::new()),
                in_flight: Mutex::new(HashMap::new()),
                next_call: AtomicU64::new(0),
            }),
        }
    }

    pub fn cache(&self) -> &Arc<CacheStore<T::Response>> {
        &self.inner.cache
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.inner.scheduler
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    pub fn transport(&self) -> &T {
        &self.inner.transport
    }

    /// Execute a request with default call options.
    pub async fn execute(&self, request: RequestDescriptor) -> Result<T::Response> {
        self.execute_with(request, CallOptions::default()).await
    }

    /// Execute a request, returning either the response or a single
    /// classified error once retries are exhausted or not allowed.
    pub async fn execute_with(
        &self,
        request: RequestDescriptor,
        options: CallOptions,
    ) -> Result<T::Response> {
        if options.is_cancelled() {
            return Err(cancelled(&request));
        }

        if cache_ttl(&self.inner.config, &request).is_some() {
            let key = cache_key(&request);
            if let Some(hit) = self.inner.cache.get(&key) {
                debug!(%key, "cache hit");
                return Ok(hit);
            }
            trace!(%key, "cache miss");
        }

        let Some(shape) = request.rate else {
            return dispatch(Arc::clone(&self.inner), request, options).await;
        };

        // The collapsed call may run with this caller's arguments on behalf of
        // others, so the token only withdraws this caller from it.
        let shaper = shaper_for(&self.inner, shaping_key(&request), shape);
        let token = options.cancel.clone();
        let failed = cancelled(&request);
        let options = CallOptions { cancel: None, ..options };
        until_cancelled(token.as_ref(), shaper.call((request, options)), failed).await
    }
}

/// Cache and de-duplication key: the explicit key or the fingerprint.
fn cache_key(request: &RequestDescriptor) -> String {
    request.cache_key.clone().unwrap_or_else(|| fingerprint(request))
}

/// Rate shaping groups calls by endpoint, so calls differing only in query
/// or body still collapse into one another.
fn shaping_key(request: &RequestDescriptor) -> String {
    match &request.cache_key {
        Some(key) => key.clone(),
        None => format!("{} {}", request.method, request.target),
    }
}

/// Time-to-live to cache a successful response with, if caching applies.
fn cache_ttl(config: &OrchestratorConfig, request: &RequestDescriptor) -> Option<Duration> {
    match request.cache {
        Some(CachePolicy { enabled: false, .. }) => None,
        Some(CachePolicy { enabled: true, ttl }) => Some(ttl.unwrap_or(config.cache_ttl)),
        None if config.cache_methods.contains(&request.method) => Some(config.cache_ttl),
        None => None,
    }
}

fn cancelled(request: &RequestDescriptor) -> ClassifiedError {
    classify(&TransportFailure::cancelled(format!(
        "{} {} was cancelled",
        request.method, request.target
    )))
}

async fn until_cancelled<V>(
    token: Option<&CancellationToken>,
    work: impl Future<Output = Result<V>>,
    on_cancel: ClassifiedError,
) -> Result<V> {
    match token {
        Some(token) => tokio::select! {
            biased;
            _ = token.cancelled() => Err(on_cancel),
            result = work => result,
        },
        None => work.await,
    }
}

#[derive(Clone)]
enum Shaper<V> {
    Debounce(Debounced<ShapedCall, V>),
    Throttle(Throttled<ShapedCall, V>),
}

impl<V: Clone + Send + Sync + 'static> Shaper<V> {
    fn matches(&self, shape: RateShaping) -> bool {
        match (self, shape) {
            (Shaper::Debounce(d), RateShaping::Debounce { wait, leading }) => {
                d.wait() == wait && d.leading() == leading
            }
            (Shaper::Throttle(t), RateShaping::Throttle { wait, trailing }) => {
                t.wait() == wait && t.trailing() == trailing
            }
            _ => false,
        }
    }

    async fn call(&self, args: ShapedCall) -> Result<V> {
        match self {
            Shaper::Debounce(d) => d.call(args).await,
            Shaper::Throttle(t) => t.call(args).await,
        }
    }

    fn downgrade(&self) -> WeakShaper<V> {
        match self {
            Shaper::Debounce(d) => WeakShaper::Debounce(d.downgrade()),
            Shaper::Throttle(t) => WeakShaper::Throttle(t.downgrade()),
        }
    }
}

/// Registry entry for a shaper; lives only while a burst or window is open
/// or a caller holds the shaper.
enum WeakShaper<V> {
    Debounce(WeakDebounced<ShapedCall, V>),
    Throttle(WeakThrottled<ShapedCall, V>),
}

impl<V> WeakShaper<V> {
    fn upgrade(&self) -> Option<Shaper<V>> {
        match self {
            WeakShaper::Debounce(d) => d.upgrade().map(Shaper::Debounce),
            WeakShaper::Throttle(t) => t.upgrade().map(Shaper::Throttle),
        }
    }

    fn is_live(&self) -> bool {
        match self {
            WeakShaper::Debounce(d) => d.is_live(),
            WeakShaper::Throttle(t) => t.is_live(),
        }
    }
}

/// Look up the wrapper for `key`, replacing it if its parameters changed.
fn shaper_for<T: Transport>(
    inner: &Arc<Inner<T>>,
    key: String,
    shape: RateShaping,
) -> Shaper<T::Response> {
    let mut shapers = inner.shapers.lock();
    if let Some(existing) = shapers
        .get(&key)
        .and_then(WeakShaper::upgrade)
        .filter(|s| s.matches(shape))
    {
        return existing;
    }

    // Weak, so a pending debounce timer never keeps the orchestrator alive.
    let weak: Weak<Inner<T>> = Arc::downgrade(inner);
    let func: RequestFn<ShapedCall, T::Response> =
        Arc::new(move |(request, options): ShapedCall| {
            let inner = weak.upgrade();
            async move {
                match inner {
                    Some(inner) => dispatch(inner, request, options).await,
                    None => Err(cancelled(&request)),
                }
            }
            .boxed()
        });

    let shaper = match shape {
        RateShaping::Debounce { wait, leading } => {
            Shaper::Debounce(Debounced::from_fn(func, wait, leading))
        }
        RateShaping::Throttle { wait, trailing } => {
            Shaper::Throttle(Throttled::from_fn(func, wait, trailing))
        }
    };
    shapers.retain(|_, idle| idle.is_live());
    debug!(%key, ?shape, live = shapers.len(), "installed rate shaper");
    shapers.insert(key, shaper.downgrade());
    shaper
}

/// Share one execution between identical concurrent calls when allowed.
async fn dispatch<T: Transport>(
    inner: Arc<Inner<T>>,
    request: RequestDescriptor,
    options: CallOptions,
) -> Result<T::Response> {
    let key = cache_key(&request);
    let dedupe =
        inner.config.dedupe_in_flight && request.method.is_safe() && options.cancel.is_none();
    if !dedupe {
        return run(inner, key, request, options).await;
    }

    let shared = {
        let mut calls = inner.in_flight.lock();
        match calls.get(&key).and_then(|entry| entry.call.upgrade()) {
            Some(existing) => {
                debug!(%key, "joined identical in-flight request");
                existing
            }
            None => {
                let id = inner.next_call.fetch_add(1, Ordering::Relaxed);
                let guard = InFlightGuard { inner: Arc::clone(&inner), key: key.clone(), id };
                let work = run(Arc::clone(&inner), key.clone(), request, options);
                let call = async move {
                    let _registered = guard;
                    work.await
                }
                .boxed()
                .shared();
                if let Some(weak) = call.downgrade() {
                    calls.insert(key, InFlight { id, call: weak });
                }
                call
            }
        }
    };

    shared.await
}

/// The retry loop of one logical request.
async fn run<T: Transport>(
    inner: Arc<Inner<T>>,
    key: String,
    request: RequestDescriptor,
    options: CallOptions,
) -> Result<T::Response> {
    let policy = request.retry.as_ref().unwrap_or(&inner.config.retry);
    let queue = request.queue.unwrap_or_default();
    let timeout = request.timeout.or(inner.config.timeout);

    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let error = match send_once(&inner, &request, &options, queue, timeout).await {
            Ok(response) => {
                store(&inner, &key, &request, &response);
                return Ok(response);
            }
            Err(failure) => classify(&failure),
        };

        if !policy.should_retry(&error, attempt) {
            if attempt > 1 {
                warn!(%key, attempt, error = %error, "giving up on request");
            } else {
                debug!(%key, error = %error, "request failed without retry");
            }
            return Err(error);
        }

        let delay = policy.delay_for(attempt);
        warn!(
            %key,
            attempt,
            kind = %error.kind(),
            delay_ms = delay.as_millis() as u64,
            "request failed, retrying"
        );
        if let Some(on_retry) = &options.on_retry {
            on_retry(&RetryEvent { attempt, error: error.clone(), delay });
        }

        let failed = cancelled(&request);
        until_cancelled(
            options.cancel.as_ref(),
            async {
                tokio::time::sleep(delay).await;
                Ok(())
            },
            failed,
        )
        .await?;
    }
}

/// One trip through the scheduler and the transport.
async fn send_once<T: Transport>(
    inner: &Inner<T>,
    request: &RequestDescriptor,
    options: &CallOptions,
    queue: QueuePolicy,
    timeout: Option<Duration>,
) -> std::result::Result<T::Response, TransportFailure> {
    let send = async move {
        // Built on admission, so progress rates never include time spent
        // waiting in the scheduler.
        let send_options = SendOptions {
            on_upload_progress: options
                .on_progress
                .as_ref()
                .map(|callback| progress_hook(Direction::Upload, callback)),
            on_download_progress: options
                .on_progress
                .as_ref()
                .map(|callback| progress_hook(Direction::Download, callback)),
            cancel: options.cancel.clone(),
        };
        let sending = inner.transport.send(request, send_options);
        match timeout {
            Some(limit) => tokio::time::timeout(limit, sending).await.unwrap_or_else(|_| {
                Err(TransportFailure::timed_out(format!(
                    "no response within {} ms",
                    limit.as_millis()
                )))
            }),
            None => sending.await,
        }
    };

    let scheduled = async move {
        if !queue.enabled {
            return send.await;
        }
        match inner.scheduler.enqueue(queue.priority).run(send).await {
            Ok(outcome) => outcome,
            Err(removed) => Err(TransportFailure::cancelled(removed.to_string())),
        }
    };

    match &options.cancel {
        Some(token) => tokio::select! {
            biased;
            _ = token.cancelled() => Err(TransportFailure::cancelled(format!(
                "{} {} was cancelled",
                request.method, request.target
            ))),
            outcome = scheduled => outcome,
        },
        None => scheduled.await,
    }
}

/// Feed one direction's byte counters through a fresh monitor.
fn progress_hook(direction: Direction, callback: &ProgressCallback) -> SampleCallback {
    let callback = Arc::clone(callback);
    let monitor = Mutex::new(ProgressMonitor::new());
    Arc::new(move |sample: ProgressSample| {
        let snapshot = monitor.lock().on_progress(sample);
        callback(direction, &snapshot);
    })
}

fn store<T: Transport>(
    inner: &Inner<T>,
    key: &str,
    request: &RequestDescriptor,
    response: &T::Response,
) {
    if let Some(ttl) = cache_ttl(&inner.config, request) {
        inner.cache.set(key, response.clone(), ttl);
        trace!(key, ttl_ms = ttl.as_millis() as u64, "cached response");
    }
    for stale in &request.invalidates {
        if inner.cache.delete(stale) {
            debug!(key = %stale, "invalidated cached response");
        }
    }
}
