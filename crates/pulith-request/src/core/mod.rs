//! Pure transformations for request orchestration.
//!
//! Nothing in this module performs I/O, sleeps, or touches shared state.
//! Time enters only as an explicit argument or through the progress
//! monitor's own previous sample.

mod classify;
mod fingerprint;
mod progress;
pub mod retry;

pub use classify::classify;
pub use fingerprint::{canonical_json, fingerprint};
pub use progress::ProgressMonitor;
pub use retry::retry_delay;
