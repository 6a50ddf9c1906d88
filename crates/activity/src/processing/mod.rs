//! Item processing
//!
//! This module provides:
//! - [`ItemProcessingRequest`] - one item with its error state and bucket
//! - [`ItemProcessor`] - the per-item work of an iterative activity
//! - [`ErrorHandlingStrategy`] and its executor - what to do with failed items
//! - [`ItemProcessingCoordinator`] - bounded worker pool applying the strategy

mod coordinator;
mod error;
mod processor;
mod request;
mod statistics;
mod strategy;

pub use coordinator::{
    BucketDrain, CoordinatorConfig, CoordinatorReport, ItemProcessingCoordinator, SubmitError,
};
pub use error::ItemError;
pub use processor::{processor_fn, FnProcessor, ItemOutcome, ItemProcessor, WorkerContext};
pub use request::{ErrorState, ItemProcessingRequest, PermanentErrorKind};
pub use statistics::{ItemCounters, ItemResultKind, ItemStatistics};
pub use strategy::{
    Decision, ErrorCategory, ErrorHandlingEntry, ErrorHandlingStrategy,
    ErrorHandlingStrategyExecutor, ErrorReaction, ErrorSituation, ExhaustedAction,
};
