//! Backoff primitives
//!
//! - [`RetryPolicy`] - bounded, exponential item retry used by `RetryLater` reactions
//! - [`PollBackoff`] - adaptive polling interval for bucket acquisition
//! - [`duration_millis`] - serde helper writing durations as milliseconds

mod backoff;
pub mod duration_millis;
mod retry;

pub use backoff::PollBackoff;
pub use retry::RetryPolicy;
