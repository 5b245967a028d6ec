use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::error::QueueError;

/// Identifier assigned to every submission, in arrival order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub(crate) u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Concurrency-limited priority scheduler.
///
/// At most `limit` units of work hold a [`Permit`] at any time. Work that
/// arrives at the limit waits in a list ordered by priority (higher first),
/// then by arrival. Admission never preempts work already running.
///
/// Cloning yields another handle to the same scheduler.
///
/// # Examples
///
/// ```
/// use pulith_request::Scheduler;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let scheduler = Scheduler::new(2);
/// let answer = scheduler.submit(async { 42 }, 0).await.unwrap();
/// assert_eq!(answer, 42);
/// assert_eq!(scheduler.in_flight(), 0);
/// # }
/// ```
#[derive(Clone)]
pub struct Scheduler {
    shared: Arc<Shared>,
}

struct Shared {
    limit: usize,
    state: Mutex<State>,
}

struct State {
    in_flight: usize,
    waiting: BinaryHeap<Waiter>,
    next_id: u64,
}

/// Waiting item. Ids are handed out in arrival order under the state lock,
/// so `id` is the arrival tiebreak; `enqueued_at` only reports wait time.
struct Waiter {
    id: TaskId,
    priority: i32,
    enqueued_at: Instant,
    tx: oneshot::Sender<Permit>,
}

impl Ord for Waiter {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: higher priority first, then the earlier arrival.
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for Waiter {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Waiter {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Waiter {}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("Scheduler")
            .field("limit", &self.shared.limit)
            .field("in_flight", &state.in_flight)
            .field("waiting", &state.waiting.len())
            .finish()
    }
}

impl Scheduler {
    /// Create a scheduler admitting at most `limit` concurrent units (minimum 1).
    pub fn new(limit: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                limit: limit.max(1),
                state: Mutex::new(State {
                    in_flight: 0,
                    waiting: BinaryHeap::new(),
                    next_id: 0,
                }),
            }),
        }
    }

    /// Register a unit of work and reserve its place in line.
    ///
    /// The arrival order is fixed here, not when the ticket is first polled.
    pub fn enqueue(&self, priority: i32) -> Ticket {
        let mut state = self.shared.state.lock();
        let id = TaskId(state.next_id);
        state.next_id += 1;

        let admission = if state.in_flight < self.shared.limit && state.waiting.is_empty() {
            state.in_flight += 1;
            trace!(task = %id, priority, in_flight = state.in_flight, "admitted");
            Admission::Ready(Permit::new(&self.shared))
        } else {
            let (tx, rx) = oneshot::channel();
            state.waiting.push(Waiter {
                id,
                priority,
                enqueued_at: Instant::now(),
                tx,
            });
            debug!(task = %id, priority, waiting = state.waiting.len(), "queued at concurrency limit");
            Admission::Waiting(WaitSlot {
                rx,
                guard: WaitGuard {
                    shared: Arc::clone(&self.shared),
                    id,
                    settled: false,
                },
            })
        };

        Ticket { id, priority, admission }
    }

    /// Run `work` once admitted and return its output.
    ///
    /// Fails only if the submission is removed with [`remove`](Self::remove)
    /// before it starts.
    pub async fn submit<F: Future>(&self, work: F, priority: i32) -> Result<F::Output, QueueError> {
        self.enqueue(priority).run(work).await
    }

    /// Withdraw a submission that is still waiting.
    ///
    /// Returns `false` if it already started (or finished); running work is
    /// never interrupted by this call.
    pub fn remove(&self, id: TaskId) -> bool {
        let removed = self.shared.forget(id);
        if removed {
            debug!(task = %id, "removed from wait list");
        }
        removed
    }

    pub fn limit(&self) -> usize {
        self.shared.limit
    }

    pub fn in_flight(&self) -> usize {
        self.shared.state.lock().in_flight
    }

    pub fn waiting(&self) -> usize {
        self.shared.state.lock().waiting.len()
    }
}

impl Shared {
    fn forget(&self, id: TaskId) -> bool {
        let mut state = self.state.lock();
        let before = state.waiting.len();
        state.waiting.retain(|w| w.id != id);
        state.waiting.len() != before
    }
}

/// Hand the slot to the best live waiter, or give it back.
fn release(shared: &Arc<Shared>) {
    let mut state = shared.state.lock();
    while let Some(waiter) = state.waiting.pop() {
        match waiter.tx.send(Permit::new(shared)) {
            Ok(()) => {
                trace!(
                    task = %waiter.id,
                    priority = waiter.priority,
                    waited_ms = waiter.enqueued_at.elapsed().as_millis() as u64,
                    "admitted from wait list"
                );
                return;
            }
            // The ticket was dropped between our pop and the send.
            Err(mut permit) => permit.disarm(),
        }
    }
    state.in_flight -= 1;
}

/// One occupied concurrency slot. Dropping it admits the next waiter.
pub struct Permit {
    shared: Option<Arc<Shared>>,
}

impl Permit {
    fn new(shared: &Arc<Shared>) -> Self {
        Self { shared: Some(Arc::clone(shared)) }
    }

    fn disarm(&mut self) {
        self.shared = None;
    }
}

impl fmt::Debug for Permit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Permit").field("armed", &self.shared.is_some()).finish()
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.take() {
            release(&shared);
        }
    }
}

/// A reserved place in the scheduler.
///
/// Dropping a ticket that is still waiting removes it from the wait list
/// without ever occupying a slot.
#[derive(Debug)]
pub struct Ticket {
    id: TaskId,
    priority: i32,
    admission: Admission,
}

#[derive(Debug)]
enum Admission {
    Ready(Permit),
    Waiting(WaitSlot),
}

#[derive(Debug)]
struct WaitSlot {
    rx: oneshot::Receiver<Permit>,
    guard: WaitGuard,
}

struct WaitGuard {
    shared: Arc<Shared>,
    id: TaskId,
    settled: bool,
}

impl fmt::Debug for WaitGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaitGuard").field("id", &self.id).field("settled", &self.settled).finish()
    }
}

impl Drop for WaitGuard {
    fn drop(&mut self) {
        if !self.settled && self.shared.forget(self.id) {
            debug!(task = %self.id, "withdrawn from wait list");
        }
    }
}

impl Ticket {
    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// Whether a slot was free at enqueue time.
    pub fn is_admitted(&self) -> bool {
        matches!(self.admission, Admission::Ready(_))
    }

    /// Wait for a slot.
    pub async fn admitted(self) -> Result<Permit, QueueError> {
        match self.admission {
            Admission::Ready(permit) => Ok(permit),
            Admission::Waiting(WaitSlot { rx, mut guard }) => {
                let received = rx.await;
                guard.settled = true;
                received.map_err(|_| QueueError::Removed(guard.id))
            }
        }
    }

    /// Wait for a slot, run `work` while holding it, then release it.
    pub async fn run<F: Future>(self, work: F) -> Result<F::Output, QueueError> {
        let permit = self.admitted().await?;
        let output = work.await;
        drop(permit);
        Ok(output)
    }
}
