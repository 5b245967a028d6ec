//! Client-side HTTP request orchestration.
//!
//! # Architecture
//!
//! This crate follows the three-layer pattern:
//! - [`data`] - Immutable request descriptors, policies and configuration
//! - [`core`] - Pure transformations: fingerprinting, error classification,
//!   retry decisions, progress math
//! - [`effects`] - Shared state and I/O: cache store, scheduler, rate shaping,
//!   transports and the [`Orchestrator`] that composes them
//!
//! # Key Features
//!
//! - **Caching**: TTL cache keyed by a deterministic request fingerprint
//! - **Priority Scheduling**: at most `N` requests in flight, waiting work
//!   ordered by priority then arrival
//! - **Retry**: classified failures retried with constant or exponential backoff
//! - **Rate Shaping**: debounce and throttle wrappers around request functions
//! - **Progress**: percentage, rate and ETA from raw byte counters
//!
//! # Example
//!
//! ```no_run
//! use pulith_request::{Orchestrator, OrchestratorConfig, RequestDescriptor, ReqwestTransport};
//!
//! # async fn run() -> pulith_request::Result<()> {
//! let transport = ReqwestTransport::new()?;
//! let orchestrator = Orchestrator::new(transport, OrchestratorConfig::default());
//!
//! let response = orchestrator
//!     .execute(RequestDescriptor::get("https://api.example.com/items").query("page", "1"))
//!     .await?;
//! println!("{}", response.status);
//! # Ok(())
//! # }
//! ```

pub mod core;
pub mod data;
pub mod effects;
mod error;

pub use core::{ProgressMonitor, classify, fingerprint, retry_delay};
pub use data::{
    Backoff, CachePolicy, CallOptions, Direction, Method, OrchestratorConfig, ProgressSample,
    ProgressSnapshot, QueuePolicy, RateShaping, RequestDescriptor, RetryEvent, RetryPolicy,
};
pub use effects::{
    CacheStore, Debounced, Orchestrator, Scheduler, SendOptions, TaskId, Throttled, Ticket,
    Transport,
};
#[cfg(feature = "reqwest")]
pub use effects::{HttpResponse, ReqwestTransport};

pub use error::{ClassifiedError, ConfigError, ErrorKind, QueueError, Result, TransportFailure};
