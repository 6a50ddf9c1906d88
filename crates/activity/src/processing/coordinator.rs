//! Item processing coordinator
//!
//! A fixed-size pool of workers sharing one bounded queue. Producers block
//! in [`ItemProcessingCoordinator::submit`] when the queue is full. Retries
//! wait out their backoff off-queue and come back through a separate retry
//! queue that workers drain first.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::error::ItemError;
use super::processor::{ItemOutcome, ItemProcessor, WorkerContext};
use super::request::ItemProcessingRequest;
use super::statistics::{ItemCounters, ItemResultKind, ItemStatistics};
use super::strategy::{Decision, ErrorHandlingStrategyExecutor};
use crate::definition::{ActivityPath, DistributionSpecification};
use crate::reporting::{ItemEvent, ProgressSink, ReportingOptions};

/// Accounting key for items submitted without a bucket
const NO_BUCKET: u32 = 0;

/// Coordinator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Number of parallel workers (at least 1)
    pub workers: usize,

    /// Capacity of the shared item queue (at least 1)
    pub queue_capacity: usize,

    #[serde(default)]
    pub reporting: ReportingOptions,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            queue_capacity: 100,
            reporting: ReportingOptions::default(),
        }
    }
}

impl CoordinatorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_distribution(distribution: &DistributionSpecification) -> Self {
        Self::default()
            .with_workers(distribution.workers)
            .with_queue_capacity(distribution.queue_capacity)
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    pub fn with_reporting(mut self, reporting: ReportingOptions) -> Self {
        self.reporting = reporting;
        self
    }
}

/// Submission errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    /// Processing stopped (error strategy or cancellation); the item was not queued
    #[error("item processing halted: {0}")]
    Halted(String),

    #[error("item queue is closed")]
    Closed,
}

/// Result of waiting for a bucket's items
#[derive(Debug, Clone, PartialEq)]
pub enum BucketDrain {
    /// Every submitted item of the bucket reached a final outcome
    Drained(ItemStatistics),
    /// Processing halted before the bucket drained
    Halted,
}

/// Final report of a coordinator run
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinatorReport {
    pub statistics: ItemStatistics,
    /// Set when the error handling strategy stopped processing
    pub stop_reason: Option<String>,
    /// Set when the run was cancelled from outside
    pub cancelled: bool,
}

impl CoordinatorReport {
    pub fn is_stopped(&self) -> bool {
        self.stop_reason.is_some()
    }
}

#[derive(Debug, Default)]
struct BucketProgress {
    outstanding: usize,
    statistics: ItemStatistics,
}

struct Shared<T> {
    path: ActivityPath,
    processor: Arc<dyn ItemProcessor<T>>,
    strategy: ErrorHandlingStrategyExecutor,
    sink: Arc<dyn ProgressSink>,
    reporting: ReportingOptions,
    main_rx: Mutex<mpsc::Receiver<ItemProcessingRequest<T>>>,
    retry_tx: mpsc::UnboundedSender<ItemProcessingRequest<T>>,
    retry_rx: Mutex<mpsc::UnboundedReceiver<ItemProcessingRequest<T>>>,
    cancellation: CancellationToken,
    halt: CancellationToken,
    shutdown: CancellationToken,
    stop_reason: parking_lot::Mutex<Option<String>>,
    buckets: DashMap<u32, BucketProgress>,
    outstanding: AtomicUsize,
    changed: Notify,
    counters: ItemCounters,
}

/// Runs items through a processor on a bounded worker pool
///
/// # Example
///
/// ```ignore
/// let coordinator = ItemProcessingCoordinator::start(
///     path.clone(),
///     processor,
///     ErrorHandlingStrategyExecutor::new(None, ErrorReaction::Continue),
///     CoordinatorConfig::new().with_workers(4),
///     sink,
///     &cancellation,
/// );
///
/// for (i, item) in items.into_iter().enumerate() {
///     coordinator
///         .submit(ItemProcessingRequest::new(i as u64, item, path.clone()).in_bucket(1))
///         .await?;
/// }
/// let drained = coordinator.drain_bucket(1).await;
/// let report = coordinator.finish().await;
/// ```
pub struct ItemProcessingCoordinator<T> {
    shared: Arc<Shared<T>>,
    sender: Option<mpsc::Sender<ItemProcessingRequest<T>>>,
    workers: Vec<JoinHandle<()>>,
}

impl<T> ItemProcessingCoordinator<T>
where
    T: Send + Sync + 'static,
{
    /// Spawn the worker pool
    pub fn start(
        path: ActivityPath,
        processor: Arc<dyn ItemProcessor<T>>,
        strategy: ErrorHandlingStrategyExecutor,
        config: CoordinatorConfig,
        sink: Arc<dyn ProgressSink>,
        cancellation: &CancellationToken,
    ) -> Self {
        let (sender, main_rx) = mpsc::channel(config.queue_capacity.max(1));
        let (retry_tx, retry_rx) = mpsc::unbounded_channel();

        let shared = Arc::new(Shared {
            path,
            processor,
            strategy,
            sink,
            reporting: config.reporting.clone(),
            main_rx: Mutex::new(main_rx),
            retry_tx,
            retry_rx: Mutex::new(retry_rx),
            cancellation: cancellation.clone(),
            halt: cancellation.child_token(),
            shutdown: CancellationToken::new(),
            stop_reason: parking_lot::Mutex::new(None),
            buckets: DashMap::new(),
            outstanding: AtomicUsize::new(0),
            changed: Notify::new(),
            counters: ItemCounters::new(),
        });

        let workers = (0..config.workers.max(1))
            .map(|index| tokio::spawn(run_worker(shared.clone(), index)))
            .collect();

        debug!(
            path = %shared.path,
            workers = config.workers.max(1),
            queue_capacity = config.queue_capacity,
            "Item processing coordinator started"
        );

        Self {
            shared,
            sender: Some(sender),
            workers,
        }
    }

    /// Enqueue an item, waiting while the queue is full
    ///
    /// Items are never dropped; once processing has halted the item is
    /// rejected instead.
    pub async fn submit(&self, request: ItemProcessingRequest<T>) -> Result<(), SubmitError> {
        if self.shared.halt.is_cancelled() {
            return Err(SubmitError::Halted(self.shared.halt_reason()));
        }
        let Some(sender) = &self.sender else {
            return Err(SubmitError::Closed);
        };

        let key = request.bucket.unwrap_or(NO_BUCKET);
        self.shared.begin(key);

        tokio::select! {
            biased;
            _ = self.shared.halt.cancelled() => {
                self.shared.abandon(key);
                Err(SubmitError::Halted(self.shared.halt_reason()))
            }
            sent = sender.send(request) => match sent {
                Ok(()) => Ok(()),
                Err(_) => {
                    self.shared.abandon(key);
                    Err(SubmitError::Closed)
                }
            },
        }
    }

    /// Wait until every item submitted so far for `bucket` has a final outcome
    ///
    /// The bucket's statistics stay accumulated; use this as the barrier
    /// before persisting resumption data for an open bucket.
    pub async fn barrier(&self, bucket: u32) -> BucketDrain {
        loop {
            let notified = self.shared.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.shared.halt.is_cancelled() {
                return BucketDrain::Halted;
            }
            let drained = match self.shared.buckets.get(&bucket) {
                Some(progress) if progress.outstanding > 0 => None,
                Some(progress) => Some(progress.statistics),
                None => Some(ItemStatistics::default()),
            };
            if let Some(statistics) = drained {
                return BucketDrain::Drained(statistics);
            }

            tokio::select! {
                _ = notified => {}
                _ = self.shared.halt.cancelled() => return BucketDrain::Halted,
            }
        }
    }

    /// Barrier, then take the bucket's statistics out of the coordinator
    pub async fn drain_bucket(&self, bucket: u32) -> BucketDrain {
        match self.barrier(bucket).await {
            BucketDrain::Drained(_) => {
                let statistics = self
                    .shared
                    .buckets
                    .remove(&bucket)
                    .map(|(_, progress)| progress.statistics)
                    .unwrap_or_default();
                BucketDrain::Drained(statistics)
            }
            BucketDrain::Halted => BucketDrain::Halted,
        }
    }

    /// Like [`drain_bucket`](Self::drain_bucket) without waiting; `None` while items are outstanding
    pub fn try_drain_bucket(&self, bucket: u32) -> Option<BucketDrain> {
        if self.shared.halt.is_cancelled() {
            return Some(BucketDrain::Halted);
        }
        let outstanding = self
            .shared
            .buckets
            .get(&bucket)
            .map(|progress| progress.outstanding)
            .unwrap_or(0);
        if outstanding > 0 {
            return None;
        }
        let statistics = self
            .shared
            .buckets
            .remove(&bucket)
            .map(|(_, progress)| progress.statistics)
            .unwrap_or_default();
        Some(BucketDrain::Drained(statistics))
    }

    /// Halted by the error handling strategy or by cancellation
    pub fn is_halted(&self) -> bool {
        self.shared.halt.is_cancelled()
    }

    /// Statistics of every item finished so far
    pub fn statistics(&self) -> ItemStatistics {
        self.shared.counters.snapshot()
    }

    /// Close the queue, let submitted items finish and stop the workers
    ///
    /// After a halt, queued items are left unprocessed and only in-flight
    /// items run to completion.
    pub async fn finish(mut self) -> CoordinatorReport {
        self.sender.take();
        self.shared.wait_idle().await;
        self.shared.shutdown.cancel();

        for worker in std::mem::take(&mut self.workers) {
            if let Err(e) = worker.await {
                error!(path = %self.shared.path, "Item worker failed: {}", e);
            }
        }

        let stop_reason = self.shared.stop_reason.lock().clone();
        let report = CoordinatorReport {
            statistics: self.shared.counters.snapshot(),
            cancelled: stop_reason.is_none() && self.shared.cancellation.is_cancelled(),
            stop_reason,
        };
        debug!(
            path = %self.shared.path,
            processed = report.statistics.processed,
            stopped = report.is_stopped(),
            cancelled = report.cancelled,
            "Item processing coordinator finished"
        );
        report
    }
}

impl<T> Drop for ItemProcessingCoordinator<T> {
    fn drop(&mut self) {
        self.shared.shutdown.cancel();
    }
}

impl<T> Shared<T> {
    fn begin(&self, key: u32) {
        self.buckets.entry(key).or_default().outstanding += 1;
        self.outstanding.fetch_add(1, Ordering::AcqRel);
    }

    /// Drop an item without an outcome (never queued, or halted while waiting)
    fn abandon(&self, key: u32) {
        if let Some(mut progress) = self.buckets.get_mut(&key) {
            progress.outstanding = progress.outstanding.saturating_sub(1);
        }
        self.outstanding.fetch_sub(1, Ordering::AcqRel);
        self.changed.notify_waiters();
    }

    fn halt_reason(&self) -> String {
        self.stop_reason
            .lock()
            .clone()
            .unwrap_or_else(|| "cancelled".to_string())
    }

    fn stop(&self, reason: String) {
        {
            let mut stop_reason = self.stop_reason.lock();
            if stop_reason.is_none() {
                *stop_reason = Some(reason);
            }
        }
        self.halt.cancel();
        self.changed.notify_waiters();
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.outstanding.load(Ordering::Acquire) == 0 || self.halt.is_cancelled() {
                return;
            }

            tokio::select! {
                _ = notified => {}
                _ = self.halt.cancelled() => return,
            }
        }
    }

    fn record(
        &self,
        request: &ItemProcessingRequest<T>,
        result: ItemResultKind,
        message: Option<String>,
    ) {
        let key = request.bucket.unwrap_or(NO_BUCKET);
        let finished = self.counters.record(result);
        if let Some(mut progress) = self.buckets.get_mut(&key) {
            progress.statistics.record(result);
            if result != ItemResultKind::Retried {
                progress.outstanding = progress.outstanding.saturating_sub(1);
            }
        }

        if self.reporting.log_item_outcomes {
            info!(
                path = %self.path,
                item = %request.display_key(),
                attempt = request.attempt,
                result = ?result,
                message = message.as_deref(),
                "Item processed"
            );
        }

        self.sink.item_processed(&ItemEvent {
            path: self.path.clone(),
            sequence: request.sequence,
            key: request.key.clone(),
            bucket: request.bucket,
            result,
            message,
        });

        if result != ItemResultKind::Retried {
            let interval = self.reporting.progress_interval;
            if interval > 0 && finished % interval == 0 {
                info!(path = %self.path, processed = finished, "Item processing progress");
            }
            self.outstanding.fetch_sub(1, Ordering::AcqRel);
            self.changed.notify_waiters();
        }
    }
}

async fn run_worker<T>(shared: Arc<Shared<T>>, index: usize)
where
    T: Send + Sync + 'static,
{
    let ctx = WorkerContext {
        worker_index: index,
        activity: shared.path.clone(),
        cancellation: shared.cancellation.clone(),
    };
    let mut main_open = true;

    loop {
        let request = tokio::select! {
            biased;
            _ = shared.halt.cancelled() => break,
            _ = shared.shutdown.cancelled() => break,
            Some(request) = async { shared.retry_rx.lock().await.recv().await } => request,
            received = async { shared.main_rx.lock().await.recv().await }, if main_open => {
                match received {
                    Some(request) => request,
                    None => {
                        main_open = false;
                        continue;
                    }
                }
            }
        };

        // Cooperative cancellation point between items
        if shared.halt.is_cancelled() {
            shared.abandon(request.bucket.unwrap_or(NO_BUCKET));
            break;
        }

        process_item(&shared, request, &ctx).await;
    }
}

async fn process_item<T>(
    shared: &Arc<Shared<T>>,
    mut request: ItemProcessingRequest<T>,
    ctx: &WorkerContext,
) where
    T: Send + Sync + 'static,
{
    let result = AssertUnwindSafe(shared.processor.process(&request, ctx))
        .catch_unwind()
        .await
        .unwrap_or_else(|_| Err(ItemError::permanent("item processor panicked")));

    let error = match result {
        Ok(ItemOutcome::Success) => {
            shared.record(&request, ItemResultKind::Succeeded, None);
            return;
        }
        Ok(ItemOutcome::Skipped(reason)) => {
            shared.record(&request, ItemResultKind::Skipped, Some(reason));
            return;
        }
        Err(error) => error,
    };

    match shared.strategy.decide(&error, request.attempt) {
        Decision::Continue => {
            warn!(
                path = %shared.path,
                item = %request.display_key(),
                "Item failed, continuing: {}",
                error
            );
            shared.record(&request, ItemResultKind::Failed, Some(error.to_string()));
        }
        Decision::Skip => {
            debug!(
                path = %shared.path,
                item = %request.display_key(),
                "Item skipped: {}",
                error
            );
            shared.record(&request, ItemResultKind::Skipped, Some(error.to_string()));
        }
        Decision::Stop { reason } => {
            error!(
                path = %shared.path,
                item = %request.display_key(),
                "Item failed, stopping activity: {}",
                reason
            );
            shared.record(&request, ItemResultKind::Failed, Some(error.to_string()));
            shared.stop(reason);
        }
        Decision::RetryAfter(delay) => {
            debug!(
                path = %shared.path,
                item = %request.display_key(),
                attempt = request.attempt,
                delay_ms = delay.as_millis() as u64,
                "Item failed, retrying later: {}",
                error
            );
            shared.record(&request, ItemResultKind::Retried, Some(error.to_string()));
            request.attempt += 1;
            schedule_retry(shared.clone(), request, delay);
        }
    }
}

fn schedule_retry<T>(shared: Arc<Shared<T>>, request: ItemProcessingRequest<T>, delay: Duration)
where
    T: Send + Sync + 'static,
{
    tokio::spawn(async move {
        let key = request.bucket.unwrap_or(NO_BUCKET);
        tokio::select! {
            _ = shared.halt.cancelled() => shared.abandon(key),
            _ = tokio::time::sleep(delay) => {
                if shared.retry_tx.send(request).is_err() {
                    shared.abandon(key);
                }
            }
        }
    });
}
