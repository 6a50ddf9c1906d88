//! Item processors

use std::future::Future;
use std::marker::PhantomData;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::error::ItemError;
use super::request::ItemProcessingRequest;
use crate::definition::ActivityPath;

/// Successful result of processing one item
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    Success,
    /// Nothing to do for this item; counted as skipped
    Skipped(String),
}

/// Context handed to a processor with each item
#[derive(Debug, Clone)]
pub struct WorkerContext {
    /// Index of the coordinator worker, 0-based
    pub worker_index: usize,
    pub activity: ActivityPath,
    pub cancellation: CancellationToken,
}

impl WorkerContext {
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

/// Processes one item at a time; shared by every worker of the pool
///
/// Failures are returned as [`ItemError`] and handled by the error
/// handling strategy, never raised past the coordinator.
#[async_trait]
pub trait ItemProcessor<T>: Send + Sync + 'static {
    async fn process(
        &self,
        request: &ItemProcessingRequest<T>,
        ctx: &WorkerContext,
    ) -> Result<ItemOutcome, ItemError>;
}

/// Processor backed by an async closure
pub struct FnProcessor<T, F> {
    f: F,
    _item: PhantomData<fn(T)>,
}

/// Build a processor from an async closure taking the request by value
///
/// # Example
///
/// ```
/// use govrun_activity::processing::{processor_fn, ItemError, ItemOutcome};
///
/// let processor = processor_fn(|request: govrun_activity::ItemProcessingRequest<u64>| async move {
///     if request.item % 2 == 0 {
///         Ok(ItemOutcome::Success)
///     } else {
///         Err(ItemError::permanent("odd"))
///     }
/// });
/// # let _ = processor;
/// ```
pub fn processor_fn<T, F, Fut>(f: F) -> FnProcessor<T, F>
where
    F: Fn(ItemProcessingRequest<T>) -> Fut,
    Fut: Future<Output = Result<ItemOutcome, ItemError>>,
{
    FnProcessor {
        f,
        _item: PhantomData,
    }
}

#[async_trait]
impl<T, F, Fut> ItemProcessor<T> for FnProcessor<T, F>
where
    T: Clone + Send + Sync + 'static,
    F: Fn(ItemProcessingRequest<T>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ItemOutcome, ItemError>> + Send + 'static,
{
    async fn process(
        &self,
        request: &ItemProcessingRequest<T>,
        _ctx: &WorkerContext,
    ) -> Result<ItemOutcome, ItemError> {
        (self.f)(request.clone()).await
    }
}
