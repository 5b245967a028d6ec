//! Shared state and I/O for request orchestration.
//!
//! The cache store, the scheduler and the rate-shaping wrappers are plain
//! values constructed by the caller; the [`Orchestrator`] holds its own
//! instances (or injected ones) instead of reaching for process globals.

mod cache;
mod orchestrator;
mod rate;
mod scheduler;
mod transport;

pub use cache::{CacheEntry, CacheStore};
pub use orchestrator::Orchestrator;
pub use rate::{Debounced, RequestFn, Throttled};
pub use scheduler::{Permit, Scheduler, TaskId, Ticket};
pub use transport::{SampleCallback, SendOptions, Transport};
#[cfg(feature = "reqwest")]
pub use transport::{HttpResponse, ReqwestTransport};
