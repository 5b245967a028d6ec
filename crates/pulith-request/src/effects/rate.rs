//! Call-rate shaping.
//!
//! [`Debounced`] and [`Throttled`] wrap an async request function and decide,
//! purely from elapsed time, how many of the calls they receive actually
//! reach it. Callers whose call is collapsed into another invocation receive
//! a clone of that invocation's result.
//!
//! A collapsed invocation is driven by the callers waiting on it. Callers
//! that go away before it starts are skipped when picking its arguments, and
//! an invocation nobody waits for any more is dropped.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::{Instant, sleep_until};
use tracing::trace;

use crate::core::classify;
use crate::error::{ClassifiedError, Result, TransportFailure};

/// Type-erased request function shaped by the wrappers.
pub type RequestFn<A, V> = Arc<dyn Fn(A) -> BoxFuture<'static, Result<V>> + Send + Sync>;

type SharedCall<V> = Shared<BoxFuture<'static, Result<V>>>;

fn erase<A, V, F, Fut>(func: F) -> RequestFn<A, V>
where
    F: Fn(A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<V>> + Send + 'static,
{
    Arc::new(move |args| func(args).boxed())
}

fn abandoned() -> ClassifiedError {
    classify(&TransportFailure::cancelled(
        "rate-shaped call was dropped before it produced a result",
    ))
}

enum Step<A, V> {
    Lead(A),
    Wait(oneshot::Receiver<SharedCall<V>>),
    Join(SharedCall<V>),
}

/// A suppressed call waiting for the invocation it will share.
struct Pending<A, V> {
    args: A,
    tx: oneshot::Sender<SharedCall<V>>,
}

async fn settle<V: Clone>(rx: oneshot::Receiver<SharedCall<V>>) -> Result<V> {
    match rx.await {
        Ok(call) => call.await,
        Err(_) => Err(abandoned()),
    }
}

/// Start one invocation with the arguments of the latest caller still
/// waiting, and hand it to every caller still waiting. Returns `false` when
/// none is left.
fn hand_off<A, V>(func: &RequestFn<A, V>, pending: Vec<Pending<A, V>>) -> bool
where
    V: Clone + Send + Sync + 'static,
{
    let (mut args, waiters): (Vec<A>, Vec<_>) = pending
        .into_iter()
        .filter(|p| !p.tx.is_closed())
        .map(|p| (p.args, p.tx))
        .unzip();
    let Some(args) = args.pop() else {
        return false;
    };

    trace!(callers = waiters.len(), "running collapsed call");
    let call = func(args).shared();
    for tx in waiters {
        let _ = tx.send(call.clone());
    }
    true
}

/// Collapses a burst of calls into one trailing invocation.
///
/// A burst is a run of calls each arriving less than `wait` after the
/// previous one. Once the burst has been quiet for `wait`, the function runs
/// once with the arguments of the last call still waiting, and every caller
/// still waiting receives that result.
///
/// With `leading` set, the first call of a burst runs immediately and
/// receives its own result; later calls in the same burst share the trailing
/// invocation, which only happens if there were any.
///
/// # Examples
///
/// ```
/// use pulith_request::Debounced;
/// use std::time::Duration;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let search = Debounced::new(
///     |term: String| async move { Ok(format!("results for {term}")) },
///     Duration::from_millis(10),
///     false,
/// );
///
/// let (a, b) = tokio::join!(search.call("ru".into()), search.call("rust".into()));
/// assert_eq!(a.unwrap(), "results for rust");
/// assert_eq!(b.unwrap(), "results for rust");
/// # }
/// ```
pub struct Debounced<A, V> {
    inner: Arc<DebounceInner<A, V>>,
}

/// Non-owning handle to a [`Debounced`]. Upgrades while a burst is open or
/// some caller still holds the wrapper.
pub(crate) struct WeakDebounced<A, V>(Weak<DebounceInner<A, V>>);

struct DebounceInner<A, V> {
    func: RequestFn<A, V>,
    wait: Duration,
    leading: bool,
    state: Mutex<DebounceState<A, V>>,
}

struct DebounceState<A, V> {
    /// End of the quiet period; `None` between bursts.
    deadline: Option<Instant>,
    pending: Vec<Pending<A, V>>,
}

impl<A, V> Clone for Debounced<A, V> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<A, V> fmt::Debug for Debounced<A, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Debounced")
            .field("wait", &self.inner.wait)
            .field("leading", &self.inner.leading)
            .finish_non_exhaustive()
    }
}

impl<A, V> Debounced<A, V> {
    pub(crate) fn downgrade(&self) -> WeakDebounced<A, V> {
        WeakDebounced(Arc::downgrade(&self.inner))
    }
}

impl<A, V> WeakDebounced<A, V> {
    pub(crate) fn upgrade(&self) -> Option<Debounced<A, V>> {
        self.0.upgrade().map(|inner| Debounced { inner })
    }

    pub(crate) fn is_live(&self) -> bool {
        self.0.strong_count() > 0
    }
}

impl<A, V> Debounced<A, V>
where
    A: Send + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new<F, Fut>(func: F, wait: Duration, leading: bool) -> Self
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        Self::from_fn(erase(func), wait, leading)
    }

    pub fn from_fn(func: RequestFn<A, V>, wait: Duration, leading: bool) -> Self {
        Self {
            inner: Arc::new(DebounceInner {
                func,
                wait,
                leading,
                state: Mutex::new(DebounceState { deadline: None, pending: Vec::new() }),
            }),
        }
    }

    pub fn wait(&self) -> Duration {
        self.inner.wait
    }

    pub fn leading(&self) -> bool {
        self.inner.leading
    }

    pub async fn call(&self, args: A) -> Result<V> {
        let step = {
            let mut state = self.inner.state.lock();
            let burst_open = state.deadline.is_some();
            state.deadline = Some(Instant::now() + self.inner.wait);

            if !burst_open {
                tokio::spawn(debounce_timer(Arc::clone(&self.inner)));
            }

            if !burst_open && self.inner.leading {
                Step::Lead(args)
            } else {
                if !state.pending.is_empty() {
                    trace!(waiters = state.pending.len() + 1, "debounce superseded pending call");
                }
                let (tx, rx) = oneshot::channel();
                state.pending.push(Pending { args, tx });
                Step::Wait(rx)
            }
        };

        match step {
            Step::Lead(args) => (self.inner.func)(args).await,
            Step::Wait(rx) => settle(rx).await,
            Step::Join(call) => call.await,
        }
    }
}

async fn debounce_timer<A, V>(inner: Arc<DebounceInner<A, V>>)
where
    A: Send + 'static,
    V: Clone + Send + Sync + 'static,
{
    loop {
        let Some(deadline) = inner.state.lock().deadline else {
            return;
        };
        sleep_until(deadline).await;

        let pending = {
            let mut state = inner.state.lock();
            if state.deadline.is_some_and(|d| d > Instant::now()) {
                continue;
            }
            state.deadline = None;
            std::mem::take(&mut state.pending)
        };

        if !pending.is_empty() && !hand_off(&inner.func, pending) {
            trace!("every debounced caller went away before the window closed");
        }
        return;
    }
}

/// Runs at most one call per `wait` window.
///
/// The first call after a window has closed runs immediately and opens a new
/// window. Calls inside an open window are suppressed: without `trailing`
/// they share the window's leading result; with `trailing`, the most recent
/// of them still waiting runs once the window closes (opening the next
/// window) and they all share its result.
///
/// The leading result is released when its window closes.
pub struct Throttled<A, V> {
    inner: Arc<ThrottleInner<A, V>>,
}

/// Non-owning handle to a [`Throttled`]. Upgrades while a window is open or
/// some caller still holds the wrapper.
pub(crate) struct WeakThrottled<A, V>(Weak<ThrottleInner<A, V>>);

struct ThrottleInner<A, V> {
    func: RequestFn<A, V>,
    wait: Duration,
    trailing: bool,
    state: Mutex<ThrottleState<A, V>>,
}

struct ThrottleState<A, V> {
    window_end: Option<Instant>,
    /// Joined by suppressed calls; only kept without `trailing`.
    leading: Option<SharedCall<V>>,
    pending: Vec<Pending<A, V>>,
    timer_armed: bool,
}

impl<A, V> Clone for Throttled<A, V> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<A, V> fmt::Debug for Throttled<A, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Throttled")
            .field("wait", &self.inner.wait)
            .field("trailing", &self.inner.trailing)
            .finish_non_exhaustive()
    }
}

impl<A, V> Throttled<A, V> {
    pub(crate) fn downgrade(&self) -> WeakThrottled<A, V> {
        WeakThrottled(Arc::downgrade(&self.inner))
    }
}

impl<A, V> WeakThrottled<A, V> {
    pub(crate) fn upgrade(&self) -> Option<Throttled<A, V>> {
        self.0.upgrade().map(|inner| Throttled { inner })
    }

    pub(crate) fn is_live(&self) -> bool {
        self.0.strong_count() > 0
    }
}

impl<A, V> Throttled<A, V>
where
    A: Send + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new<F, Fut>(func: F, wait: Duration, trailing: bool) -> Self
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        Self::from_fn(erase(func), wait, trailing)
    }

    pub fn from_fn(func: RequestFn<A, V>, wait: Duration, trailing: bool) -> Self {
        Self {
            inner: Arc::new(ThrottleInner {
                func,
                wait,
                trailing,
                state: Mutex::new(ThrottleState {
                    window_end: None,
                    leading: None,
                    pending: Vec::new(),
                    timer_armed: false,
                }),
            }),
        }
    }

    pub fn wait(&self) -> Duration {
        self.inner.wait
    }

    pub fn trailing(&self) -> bool {
        self.inner.trailing
    }

    pub async fn call(&self, args: A) -> Result<V> {
        let step = {
            let mut state = self.inner.state.lock();
            let now = Instant::now();
            let in_window = state.window_end.is_some_and(|end| now < end);

            if in_window && self.inner.trailing {
                let (tx, rx) = oneshot::channel();
                state.pending.push(Pending { args, tx });
                Step::Wait(rx)
            } else if let (true, Some(leading)) = (in_window, &state.leading) {
                trace!("throttled call joined the window's leading call");
                Step::Join(leading.clone())
            } else {
                state.window_end = Some(now + self.inner.wait);
                let call = (self.inner.func)(args).shared();
                if !self.inner.trailing {
                    state.leading = Some(call.clone());
                }
                if !state.timer_armed {
                    state.timer_armed = true;
                    tokio::spawn(throttle_timer(Arc::clone(&self.inner)));
                }
                Step::Join(call)
            }
        };

        match step {
            Step::Lead(args) => (self.inner.func)(args).await,
            Step::Wait(rx) => settle(rx).await,
            Step::Join(call) => call.await,
        }
    }
}

async fn throttle_timer<A, V>(inner: Arc<ThrottleInner<A, V>>)
where
    A: Send + 'static,
    V: Clone + Send + Sync + 'static,
{
    loop {
        let Some(window_end) = inner.state.lock().window_end else {
            return;
        };
        sleep_until(window_end).await;

        if !close_window(&inner) {
            return;
        }
    }
}

/// Settle an elapsed window: run the trailing call if one is still waiting,
/// otherwise release the window. Returns whether a window is open afterwards.
fn close_window<A, V>(inner: &ThrottleInner<A, V>) -> bool
where
    V: Clone + Send + Sync + 'static,
{
    let mut state = inner.state.lock();
    if state.window_end.is_some_and(|end| end > Instant::now()) {
        return true;
    }

    let pending = std::mem::take(&mut state.pending);
    if hand_off(&inner.func, pending) {
        trace!("throttle trailing call opened a new window");
        state.window_end = Some(Instant::now() + inner.wait);
        return true;
    }

    state.window_end = None;
    state.leading = None;
    state.timer_armed = false;
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::{sleep, timeout};

    const WINDOW: Duration = Duration::from_millis(1000);

    fn counting(
        calls: &Arc<AtomicUsize>,
    ) -> impl Fn(u32) -> BoxFuture<'static, Result<u32>> + Send + Sync + 'static {
        let calls = Arc::clone(calls);
        move |x| {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(x * 10)
            }
            .boxed()
        }
    }

    async fn after<T>(delay: u64, fut: impl Future<Output = T>) -> T {
        sleep(Duration::from_millis(delay)).await;
        fut.await
    }

    #[tokio::test(start_paused = true)]
    async fn debounce_collapses_burst() {
        let calls = Arc::new(AtomicUsize::new(0));
        let debounced = Debounced::new(counting(&calls), WINDOW, false);

        let (a, b, c) = tokio::join!(
            debounced.call(1),
            after(50, debounced.call(2)),
            after(100, debounced.call(3)),
        );

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(a.unwrap(), 30);
        assert_eq!(b.unwrap(), 30);
        assert_eq!(c.unwrap(), 30);
    }

    #[tokio::test(start_paused = true)]
    async fn debounce_waits_for_quiet_period() {
        let calls = Arc::new(AtomicUsize::new(0));
        let debounced = Debounced::new(counting(&calls), WINDOW, false);

        let start = Instant::now();
        let (_, _) = tokio::join!(debounced.call(1), after(600, debounced.call(2)));

        assert_eq!(start.elapsed(), Duration::from_millis(1600));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn debounce_separate_bursts_run_separately() {
        let calls = Arc::new(AtomicUsize::new(0));
        let debounced = Debounced::new(counting(&calls), WINDOW, false);

        assert_eq!(debounced.call(1).await.unwrap(), 10);
        assert_eq!(debounced.call(2).await.unwrap(), 20);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn debounce_leading_runs_first_call_immediately() {
        let calls = Arc::new(AtomicUsize::new(0));
        let debounced = Debounced::new(counting(&calls), WINDOW, true);

        let (a, b, c) = tokio::join!(
            debounced.call(1),
            after(50, debounced.call(2)),
            after(100, debounced.call(3)),
        );

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(a.unwrap(), 10);
        assert_eq!(b.unwrap(), 30);
        assert_eq!(c.unwrap(), 30);
    }

    #[tokio::test(start_paused = true)]
    async fn debounce_leading_alone_has_no_trailing_call() {
        let calls = Arc::new(AtomicUsize::new(0));
        let debounced = Debounced::new(counting(&calls), WINDOW, true);

        assert_eq!(debounced.call(1).await.unwrap(), 10);
        sleep(WINDOW * 2).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn throttle_leading_only() {
        let calls = Arc::new(AtomicUsize::new(0));
        let throttled = Throttled::new(counting(&calls), WINDOW, false);

        let (a, b, c) = tokio::join!(
            throttled.call(1),
            after(100, throttled.call(2)),
            after(200, throttled.call(3)),
        );

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(a.unwrap(), 10);
        assert_eq!(b.unwrap(), 10);
        assert_eq!(c.unwrap(), 10);

        sleep(WINDOW).await;
        assert_eq!(throttled.call(4).await.unwrap(), 40);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn throttle_trailing_runs_latest_pending_call() {
        let calls = Arc::new(AtomicUsize::new(0));
        let throttled = Throttled::new(counting(&calls), WINDOW, true);

        let start = Instant::now();
        let (a, b, c) = tokio::join!(
            throttled.call(1),
            after(100, throttled.call(2)),
            after(200, throttled.call(3)),
        );

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(a.unwrap(), 10);
        assert_eq!(b.unwrap(), 30);
        assert_eq!(c.unwrap(), 30);
        assert_eq!(start.elapsed(), WINDOW);
    }

    #[tokio::test(start_paused = true)]
    async fn errors_are_shared_with_collapsed_callers() {
        let debounced: Debounced<u32, u32> = Debounced::new(
            |_| async { Err(classify(&TransportFailure::status(503, "unavailable"))) },
            WINDOW,
            false,
        );

        let (a, b) = tokio::join!(debounced.call(1), after(10, debounced.call(2)));
        assert_eq!(a.unwrap_err().status(), Some(503));
        assert_eq!(b.unwrap_err().status(), Some(503));
    }

    #[tokio::test(start_paused = true)]
    async fn debounce_skips_callers_that_went_away() {
        let calls = Arc::new(AtomicUsize::new(0));
        let debounced = Debounced::new(counting(&calls), WINDOW, false);

        let (a, b) = tokio::join!(
            debounced.call(1),
            after(50, timeout(Duration::from_millis(100), debounced.call(2))),
        );

        assert!(b.is_err());
        assert_eq!(a.unwrap(), 10);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn debounce_with_no_caller_left_never_runs() {
        let calls = Arc::new(AtomicUsize::new(0));
        let debounced = Debounced::new(counting(&calls), WINDOW, false);

        assert!(timeout(Duration::from_millis(100), debounced.call(1)).await.is_err());
        sleep(WINDOW * 2).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn throttle_trailing_skips_callers_that_went_away() {
        let calls = Arc::new(AtomicUsize::new(0));
        let throttled = Throttled::new(counting(&calls), WINDOW, true);

        let (a, b, c) = tokio::join!(
            throttled.call(1),
            after(100, throttled.call(2)),
            after(200, timeout(Duration::from_millis(400), throttled.call(3))),
        );

        assert_eq!(a.unwrap(), 10);
        assert_eq!(b.unwrap(), 20);
        assert!(c.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn throttle_releases_window_once_it_closes() {
        let calls = Arc::new(AtomicUsize::new(0));
        let throttled = Throttled::new(counting(&calls), WINDOW, false);
        let weak = throttled.downgrade();

        assert_eq!(throttled.call(1).await.unwrap(), 10);
        drop(throttled);

        let open = weak.upgrade().expect("window keeps the wrapper alive");
        assert!(open.inner.state.lock().leading.is_some());
        drop(open);

        sleep(WINDOW + Duration::from_millis(1)).await;
        assert!(!weak.is_live());
    }
}
