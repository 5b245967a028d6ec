//! Immutable data types for request orchestration.
//!
//! This module contains the request descriptor, the per-request policies,
//! the orchestrator configuration and the progress types. These values are
//! built once and passed between layers without mutation.

pub mod call;
pub mod config;
pub mod descriptor;
pub mod policy;
pub mod progress;

pub use call::{CallOptions, ProgressCallback, RetryCallback, RetryEvent};
pub use config::OrchestratorConfig;
pub use descriptor::{Method, RequestDescriptor};
pub use policy::{Backoff, CachePolicy, QueuePolicy, RateShaping, RetryPolicy};
pub use progress::{Direction, ProgressSample, ProgressSnapshot};
