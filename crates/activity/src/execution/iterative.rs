//! Iterative (bucketed) leaf activities
//!
//! An [`IterativeActivity`] describes its input space and produces the items
//! of one bucket at a time; [`IterativeRun`] does the rest: claiming buckets,
//! renewing their leases, feeding the coordinator and completing buckets
//! once their items are drained.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};

use super::context::{ExecutionContext, LeafContext};
use super::execution::ActivityRunError;
use super::handler::{LeafExecution, LeafReport};
use crate::bucketing::{Bucket, BucketAcquisition, BucketManager, InputSpace};
use crate::definition::ActivityPath;
use crate::persistence::WorkStateHandle;
use crate::processing::{
    BucketDrain, CoordinatorConfig, ErrorHandlingStrategyExecutor, ErrorState,
    ItemProcessingCoordinator, ItemProcessingRequest, ItemProcessor, ItemStatistics,
};

/// A leaf activity that processes a bucketed input space item by item
///
/// # Example
///
/// ```ignore
/// struct Numbers;
///
/// #[async_trait]
/// impl IterativeActivity for Numbers {
///     type Item = u64;
///
///     async fn input_space(&self, _ctx: &LeafContext<'_>) -> Result<InputSpace, ActivityRunError> {
///         Ok(InputSpace::inclusive(1, 100))
///     }
///
///     async fn produce(
///         &self,
///         bucket: &Bucket,
///         _resumption: Option<Value>,
///         sink: &ItemSink<'_, u64>,
///     ) -> Result<Option<Value>, ActivityRunError> {
///         if let BucketRange::Numeric { from, to: Some(to) } = &bucket.range {
///             for n in *from..*to {
///                 if !sink.submit(n).await {
///                     break;
///                 }
///             }
///         }
///         Ok(None)
///     }
///
///     fn processor(&self) -> Arc<dyn ItemProcessor<u64>> {
///         Arc::new(processor_fn(|_request| async { Ok(ItemOutcome::Success) }))
///     }
/// }
/// ```
#[async_trait]
pub trait IterativeActivity: Send + Sync + 'static {
    type Item: Send + Sync + 'static;

    /// Input space to partition into buckets
    async fn input_space(&self, ctx: &LeafContext<'_>) -> Result<InputSpace, ActivityRunError>;

    /// Submit the items of one bucket
    ///
    /// `resumption` is the activity's persisted resumption data. The returned
    /// value, if any, is persisted together with the bucket's completion.
    async fn produce(
        &self,
        bucket: &Bucket,
        resumption: Option<Value>,
        sink: &ItemSink<'_, Self::Item>,
    ) -> Result<Option<Value>, ActivityRunError>;

    /// Processor shared by every worker of the pool
    fn processor(&self) -> Arc<dyn ItemProcessor<Self::Item>>;
}

/// Item intake of the bucket being produced
pub struct ItemSink<'a, T> {
    coordinator: &'a ItemProcessingCoordinator<T>,
    state: &'a WorkStateHandle,
    path: &'a ActivityPath,
    bucket: u32,
    sequence: &'a AtomicU64,
    cancellation: &'a CancellationToken,
}

impl<T> ItemSink<'_, T>
where
    T: Send + Sync + 'static,
{
    /// Submit an item; `false` once processing has halted
    pub async fn submit(&self, item: T) -> bool {
        self.submit_request(self.request(item)).await
    }

    /// Submit an item with a display key and the error state of its source
    pub async fn submit_with(&self, item: T, key: impl Into<String>, error_state: ErrorState) -> bool {
        let request = self.request(item).with_key(key).with_error_state(error_state);
        self.submit_request(request).await
    }

    /// Wait for every item submitted so far, then persist `resumption`
    ///
    /// Returns `false` without persisting when processing halted first.
    pub async fn checkpoint(&self, resumption: Value) -> Result<bool, ActivityRunError> {
        match self.coordinator.barrier(self.bucket).await {
            BucketDrain::Drained(_) => {
                self.state
                    .update(|s| s.resumption = Some(resumption.clone()))
                    .await?;
                debug!(path = %self.path, bucket = self.bucket, "Resumption checkpoint saved");
                Ok(true)
            }
            BucketDrain::Halted => Ok(false),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled() || self.coordinator.is_halted()
    }

    /// Number of the bucket being produced
    pub fn bucket(&self) -> u32 {
        self.bucket
    }

    fn request(&self, item: T) -> ItemProcessingRequest<T> {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        ItemProcessingRequest::new(sequence, item, self.path.clone()).in_bucket(self.bucket)
    }

    async fn submit_request(&self, request: ItemProcessingRequest<T>) -> bool {
        match self.coordinator.submit(request).await {
            Ok(()) => true,
            Err(e) => {
                debug!(path = %self.path, bucket = self.bucket, "Item not submitted: {}", e);
                false
            }
        }
    }
}

/// A bucket produced but not yet drained (non-sequential mode)
struct PendingBucket {
    bucket: Bucket,
    resumption: Option<Value>,
    /// Stops the lease heartbeat when dropped
    lease: DropGuard,
}

/// [`LeafExecution`] driving an [`IterativeActivity`]
pub struct IterativeRun<A> {
    activity: A,
}

impl<A: IterativeActivity> IterativeRun<A> {
    pub fn new(activity: A) -> Self {
        Self { activity }
    }
}

#[async_trait]
impl<A: IterativeActivity> LeafExecution for IterativeRun<A> {
    async fn run(&self, ctx: &LeafContext<'_>) -> Result<LeafReport, ActivityRunError> {
        let execution = ctx.execution;
        let manager = Arc::new(
            BucketManager::new(ctx.state.clone())
                .with_lease_timeout(execution.settings.lease_timeout)
                .with_poll_backoff(execution.settings.bucket_poll.clone()),
        );

        manager.release_worker_buckets(&execution.worker_id).await?;
        manager
            .reclaim_stale_buckets(execution.settings.lease_timeout)
            .await?;

        let space = self.activity.input_space(ctx).await?;
        let distribution = &ctx.definition.distribution;
        manager.initialize(&space, &distribution.buckets).await?;

        let initial = ctx.state.load().await?;
        let before = initial.statistics;

        let coordinator = ItemProcessingCoordinator::start(
            ctx.path.clone(),
            self.activity.processor(),
            ErrorHandlingStrategyExecutor::new(
                ctx.definition.control_flow.error_handling.clone(),
                ctx.default_error_action.clone(),
            ),
            CoordinatorConfig::from_distribution(distribution).with_reporting(ctx.reporting.clone()),
            execution.sink.clone(),
            &execution.cancellation,
        );

        let mut driver = BucketDriver {
            activity: &self.activity,
            ctx,
            manager: &manager,
            coordinator: &coordinator,
            sequence: AtomicU64::new(0),
            resumption: initial.resumption,
            pending: Vec::new(),
        };
        let driven = driver.drive(distribution.sequential_buckets).await;
        drop(driver);

        let halted = coordinator.is_halted() || execution.is_cancelled() || driven.is_err();
        if halted {
            if let Err(e) = manager.release_worker_buckets(&execution.worker_id).await {
                warn!(path = %ctx.path, "Failed to release buckets: {}", e);
            }
        }

        let report = coordinator.finish().await;
        driven?;

        let interrupted = report.stop_reason.is_none() && (report.cancelled || execution.is_cancelled());
        let finished = report.stop_reason.is_none() && !interrupted;

        let statistics = if finished {
            ctx.state.load().await?.statistics
        } else {
            let mut statistics = before;
            statistics.merge(&report.statistics);
            statistics
        };

        if finished {
            info!(
                path = %ctx.path,
                processed = statistics.processed,
                failed = statistics.failed,
                skipped = statistics.skipped,
                "All buckets complete"
            );
        }

        Ok(LeafReport {
            statistics,
            stop_reason: report.stop_reason,
            interrupted,
        })
    }
}

/// Bucket loop of one iterative run
struct BucketDriver<'r, 'c, A: IterativeActivity> {
    activity: &'r A,
    ctx: &'r LeafContext<'c>,
    manager: &'r Arc<BucketManager>,
    coordinator: &'r ItemProcessingCoordinator<A::Item>,
    sequence: AtomicU64,
    resumption: Option<Value>,
    pending: Vec<PendingBucket>,
}

impl<A: IterativeActivity> BucketDriver<'_, '_, A> {
    fn execution(&self) -> &ExecutionContext {
        self.ctx.execution
    }

    async fn drive(&mut self, sequential: bool) -> Result<(), ActivityRunError> {
        loop {
            if !self.complete_drained(false).await? {
                return Ok(());
            }

            let acquisition = if !sequential && !self.pending.is_empty() {
                match self.manager.get_next_bucket(&self.execution().worker_id).await? {
                    Some(bucket) => BucketAcquisition::Bucket(bucket),
                    None => {
                        if !self.complete_drained(true).await? {
                            return Ok(());
                        }
                        continue;
                    }
                }
            } else {
                self.manager
                    .wait_for_next_bucket(&self.execution().worker_id, &self.execution().cancellation)
                    .await?
            };

            let bucket = match acquisition {
                BucketAcquisition::Bucket(bucket) => bucket,
                BucketAcquisition::AllComplete => return Ok(()),
                BucketAcquisition::Cancelled => return Ok(()),
            };

            debug!(
                path = %self.ctx.path,
                bucket = bucket.sequential_number,
                attempt = bucket.attempts,
                "Processing bucket"
            );
            let lease = self.spawn_heartbeat(&bucket);

            let sink = ItemSink {
                coordinator: self.coordinator,
                state: &self.ctx.state,
                path: self.ctx.path,
                bucket: bucket.sequential_number,
                sequence: &self.sequence,
                cancellation: &self.execution().cancellation,
            };
            let resumption = self
                .activity
                .produce(&bucket, self.resumption.clone(), &sink)
                .await?;

            if self.coordinator.is_halted() || self.execution().is_cancelled() {
                return Ok(());
            }

            self.pending.push(PendingBucket {
                bucket,
                resumption,
                lease,
            });
            if sequential && !self.complete_drained(true).await? {
                return Ok(());
            }
        }
    }

    /// Complete pending buckets whose items are drained
    ///
    /// With `wait`, blocks until every pending bucket is drained. Returns
    /// `false` when processing halted.
    async fn complete_drained(&mut self, wait: bool) -> Result<bool, ActivityRunError> {
        while !self.pending.is_empty() {
            let number = self.pending[0].bucket.sequential_number;
            let drain = if wait {
                self.coordinator.drain_bucket(number).await
            } else {
                match self.coordinator.try_drain_bucket(number) {
                    Some(drain) => drain,
                    None => return Ok(true),
                }
            };

            let statistics = match drain {
                BucketDrain::Drained(statistics) => statistics,
                BucketDrain::Halted => return Ok(false),
            };

            let pending = self.pending.remove(0);
            self.complete(pending, statistics).await?;
        }
        Ok(true)
    }

    async fn complete(
        &mut self,
        pending: PendingBucket,
        statistics: ItemStatistics,
    ) -> Result<(), ActivityRunError> {
        let PendingBucket {
            bucket,
            resumption,
            lease,
        } = pending;
        drop(lease);

        if resumption.is_some() {
            self.resumption = resumption.clone();
        }
        if self
            .manager
            .complete_bucket(&bucket, &statistics, resumption)
            .await?
        {
            self.execution()
                .sink
                .bucket_completed(self.ctx.path, &bucket, &statistics);
        }
        Ok(())
    }

    /// Renew the bucket's lease until the returned guard is dropped
    fn spawn_heartbeat(&self, bucket: &Bucket) -> DropGuard {
        let token = self.execution().cancellation.child_token();
        let stop = token.clone();
        let manager = self.manager.clone();
        let bucket = bucket.clone();
        let worker_id = self.execution().worker_id.clone();
        let interval = self.execution().settings.heartbeat_interval();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
                match manager.renew_lease(&bucket, &worker_id).await {
                    Ok(true) => {}
                    Ok(false) => {
                        warn!(
                            path = %manager.path(),
                            bucket = bucket.sequential_number,
                            "Bucket lease lost"
                        );
                        break;
                    }
                    Err(e) => warn!(
                        path = %manager.path(),
                        bucket = bucket.sequential_number,
                        "Failed to renew bucket lease: {}",
                        e
                    ),
                }
            }
        });

        token.drop_guard()
    }
}
