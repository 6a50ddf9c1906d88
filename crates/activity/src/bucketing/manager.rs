//! Bucket manager: claiming and completing buckets through the work state

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

use super::bucket::{Bucket, BucketState, BucketingSpecification, InputSpace};
use crate::definition::ActivityPath;
use crate::persistence::{WorkStateError, WorkStateHandle};
use crate::processing::ItemStatistics;
use crate::reliability::PollBackoff;

/// Errors from bucket operations
#[derive(Debug, thiserror::Error)]
pub enum BucketError {
    #[error(transparent)]
    WorkState(#[from] WorkStateError),

    /// Persisted bucket list does not match the activity's input space
    #[error("persisted buckets at {path} do not match the input space: {reason}")]
    LayoutMismatch { path: ActivityPath, reason: String },

    /// Bucket number not present in the persisted list
    #[error("no bucket #{number} at {path}")]
    UnknownBucket { path: ActivityPath, number: u32 },
}

/// Result of waiting for a bucket
#[derive(Debug, Clone, PartialEq)]
pub enum BucketAcquisition {
    /// A bucket was claimed for this worker
    Bucket(Bucket),
    /// Every bucket is complete
    AllComplete,
    Cancelled,
}

/// Claims and completes the buckets of one iterative activity
///
/// All state lives in the activity's work-state document; every transition is
/// a conditional write, so several worker processes can share the list.
pub struct BucketManager {
    state: Arc<WorkStateHandle>,
    lease_timeout: Duration,
    poll: PollBackoff,
}

impl BucketManager {
    pub fn new(state: Arc<WorkStateHandle>) -> Self {
        Self {
            state,
            lease_timeout: Duration::from_secs(300),
            poll: PollBackoff::default(),
        }
    }

    /// Delegations older than this are considered abandoned
    pub fn with_lease_timeout(mut self, timeout: Duration) -> Self {
        self.lease_timeout = timeout;
        self
    }

    pub fn with_poll_backoff(mut self, poll: PollBackoff) -> Self {
        self.poll = poll;
        self
    }

    pub fn lease_timeout(&self) -> Duration {
        self.lease_timeout
    }

    pub fn path(&self) -> &ActivityPath {
        self.state.path()
    }

    /// Create the bucket list if the work state has none
    ///
    /// An existing list is kept as is (resume); it must still partition the
    /// same input space.
    #[instrument(skip(self, space, spec), fields(path = %self.path()))]
    pub async fn initialize(
        &self,
        space: &InputSpace,
        spec: &BucketingSpecification,
    ) -> Result<Vec<Bucket>, BucketError> {
        let fresh = spec.buckets_for(space);
        let mut existing: Option<Vec<Bucket>> = None;

        let created = self
            .state
            .update_if(|state| match &state.buckets {
                Some(buckets) => {
                    existing = Some(buckets.clone());
                    None
                }
                None => {
                    state.buckets = Some(fresh.clone());
                    Some(fresh.clone())
                }
            })
            .await?;

        if let Some(buckets) = created {
            debug!(count = buckets.len(), "Initialised buckets");
            return Ok(buckets);
        }

        let buckets = existing.unwrap_or_default();
        let persisted: Vec<_> = buckets.iter().map(|b| &b.range).collect();
        let expected: Vec<_> = fresh.iter().map(|b| &b.range).collect();
        if persisted != expected {
            return Err(BucketError::LayoutMismatch {
                path: self.path().clone(),
                reason: format!(
                    "{} persisted buckets, {} expected",
                    persisted.len(),
                    expected.len()
                ),
            });
        }

        debug!(
            count = buckets.len(),
            complete = buckets.iter().filter(|b| b.is_complete()).count(),
            "Resuming with persisted buckets"
        );
        Ok(buckets)
    }

    /// Claim the first `ready` bucket, or `None` if every bucket is complete or delegated
    pub async fn get_next_bucket(&self, worker_id: &str) -> Result<Option<Bucket>, BucketError> {
        let claimed = self
            .state
            .update_if(|state| {
                let bucket = state
                    .buckets
                    .as_mut()?
                    .iter_mut()
                    .find(|b| b.state == BucketState::Ready)?;
                bucket.state = BucketState::Delegated;
                bucket.worker_id = Some(worker_id.to_string());
                bucket.delegated_at = Some(Utc::now());
                bucket.attempts += 1;
                Some(bucket.clone())
            })
            .await?;

        if let Some(bucket) = &claimed {
            trace!(
                path = %self.path(),
                bucket = bucket.sequential_number,
                worker_id,
                "Claimed bucket"
            );
        }
        Ok(claimed)
    }

    /// Claim a bucket, polling while the remaining ones are delegated elsewhere
    ///
    /// Stale delegations are reclaimed between polls.
    pub async fn wait_for_next_bucket(
        &self,
        worker_id: &str,
        cancellation: &CancellationToken,
    ) -> Result<BucketAcquisition, BucketError> {
        let mut backoff = self.poll.clone();

        loop {
            if cancellation.is_cancelled() {
                return Ok(BucketAcquisition::Cancelled);
            }

            if let Some(bucket) = self.get_next_bucket(worker_id).await? {
                return Ok(BucketAcquisition::Bucket(bucket));
            }

            let buckets = self.buckets().await?;
            if buckets.iter().all(Bucket::is_complete) {
                return Ok(BucketAcquisition::AllComplete);
            }

            if self.reclaim_stale_buckets(self.lease_timeout).await? > 0 {
                backoff.reset();
                continue;
            }

            let interval = backoff.next_interval();
            trace!(
                path = %self.path(),
                interval_ms = interval.as_millis() as u64,
                "All remaining buckets delegated, waiting"
            );
            tokio::select! {
                _ = cancellation.cancelled() => return Ok(BucketAcquisition::Cancelled),
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }

    /// Mark a bucket complete and fold its item statistics into the activity
    ///
    /// `resumption` replaces the activity's resumption data in the same
    /// write. Returns `false` when the bucket was already complete; its
    /// statistics are not counted twice.
    pub async fn complete_bucket(
        &self,
        bucket: &Bucket,
        statistics: &ItemStatistics,
        resumption: Option<Value>,
    ) -> Result<bool, BucketError> {
        let number = bucket.sequential_number;
        let mut unknown = false;

        let completed = self
            .state
            .update_if(|state| {
                let Some(target) = state
                    .buckets
                    .as_mut()
                    .and_then(|b| b.iter_mut().find(|b| b.sequential_number == number))
                else {
                    unknown = true;
                    return None;
                };
                if target.is_complete() {
                    return None;
                }
                target.state = BucketState::Complete;
                target.completed_at = Some(Utc::now());
                state.statistics.merge(statistics);
                if let Some(resumption) = &resumption {
                    state.resumption = Some(resumption.clone());
                }
                Some(())
            })
            .await?
            .is_some();

        if unknown {
            return Err(BucketError::UnknownBucket {
                path: self.path().clone(),
                number,
            });
        }
        if !completed {
            warn!(path = %self.path(), bucket = number, "Bucket was already complete");
        }
        Ok(completed)
    }

    /// Refresh the delegation timestamp of a bucket this worker still holds
    pub async fn renew_lease(&self, bucket: &Bucket, worker_id: &str) -> Result<bool, BucketError> {
        let number = bucket.sequential_number;
        Ok(self
            .state
            .update_if(|state| {
                let target = state
                    .buckets
                    .as_mut()?
                    .iter_mut()
                    .find(|b| b.sequential_number == number)?;
                if target.state != BucketState::Delegated
                    || target.worker_id.as_deref() != Some(worker_id)
                {
                    return None;
                }
                target.delegated_at = Some(Utc::now());
                Some(())
            })
            .await?
            .is_some())
    }

    /// Return every bucket delegated to `worker_id` to `ready`
    ///
    /// Called on entry: buckets still delegated to our own id belong to a
    /// previous incarnation of this worker that did not finish them.
    pub async fn release_worker_buckets(&self, worker_id: &str) -> Result<usize, BucketError> {
        let released = self
            .state
            .update_if(|state| {
                let mut released = 0;
                for bucket in state.buckets.iter_mut().flatten() {
                    if bucket.state == BucketState::Delegated
                        && bucket.worker_id.as_deref() == Some(worker_id)
                    {
                        bucket.release();
                        released += 1;
                    }
                }
                (released > 0).then_some(released)
            })
            .await?
            .unwrap_or(0);

        if released > 0 {
            info!(path = %self.path(), worker_id, released, "Released unfinished buckets");
        }
        Ok(released)
    }

    /// Return delegations older than `threshold` to `ready`
    pub async fn reclaim_stale_buckets(&self, threshold: Duration) -> Result<usize, BucketError> {
        let threshold = chrono::Duration::from_std(threshold).unwrap_or(chrono::Duration::MAX);
        let reclaimed = self
            .state
            .update_if(|state| {
                let now = Utc::now();
                let mut reclaimed = 0;
                for bucket in state.buckets.iter_mut().flatten() {
                    let stale = bucket.state == BucketState::Delegated
                        && bucket
                            .delegated_at
                            .map_or(true, |at| now.signed_duration_since(at) >= threshold);
                    if stale {
                        bucket.release();
                        reclaimed += 1;
                    }
                }
                (reclaimed > 0).then_some(reclaimed)
            })
            .await?
            .unwrap_or(0);

        if reclaimed > 0 {
            warn!(path = %self.path(), reclaimed, "Reclaimed buckets with expired leases");
        }
        Ok(reclaimed)
    }

    /// Current persisted bucket list
    pub async fn buckets(&self) -> Result<Vec<Bucket>, BucketError> {
        Ok(self.state.load().await?.buckets.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::InMemoryWorkStateStore;
    use uuid::Uuid;

    fn manager() -> BucketManager {
        let store = Arc::new(InMemoryWorkStateStore::new());
        let handle = WorkStateHandle::new(store, Uuid::now_v7(), ActivityPath::root().child("a"));
        BucketManager::new(Arc::new(handle)).with_poll_backoff(
            PollBackoff::new()
                .with_min_interval(Duration::from_millis(5))
                .with_max_interval(Duration::from_millis(20)),
        )
    }

    #[tokio::test]
    async fn test_claims_in_ascending_order() {
        let manager = manager();
        manager
            .initialize(&InputSpace::inclusive(1, 30), &BucketingSpecification::numeric(10))
            .await
            .unwrap();

        let first = manager.get_next_bucket("w1").await.unwrap().unwrap();
        let second = manager.get_next_bucket("w2").await.unwrap().unwrap();
        assert_eq!(first.sequential_number, 1);
        assert_eq!(second.sequential_number, 2);
        assert_eq!(second.worker_id.as_deref(), Some("w2"));
        assert_eq!(second.state, BucketState::Delegated);

        manager.get_next_bucket("w1").await.unwrap().unwrap();
        assert!(manager.get_next_bucket("w1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let manager = manager();
        let space = InputSpace::inclusive(1, 10);
        let spec = BucketingSpecification::numeric(5);
        manager.initialize(&space, &spec).await.unwrap();
        let bucket = manager.get_next_bucket("w1").await.unwrap().unwrap();

        let again = manager.initialize(&space, &spec).await.unwrap();
        assert_eq!(again[0].state, BucketState::Delegated);
        assert_eq!(again[0].sequential_number, bucket.sequential_number);

        let mismatch = manager
            .initialize(&InputSpace::inclusive(1, 20), &spec)
            .await;
        assert!(matches!(mismatch, Err(BucketError::LayoutMismatch { .. })));
    }

    #[tokio::test]
    async fn test_complete_bucket_once() {
        let manager = manager();
        manager
            .initialize(&InputSpace::inclusive(1, 5), &BucketingSpecification::single())
            .await
            .unwrap();
        let bucket = manager.get_next_bucket("w1").await.unwrap().unwrap();

        let stats = ItemStatistics {
            processed: 5,
            succeeded: 5,
            ..Default::default()
        };
        assert!(manager.complete_bucket(&bucket, &stats, None).await.unwrap());
        assert!(!manager.complete_bucket(&bucket, &stats, None).await.unwrap());

        let state = manager.state.load().await.unwrap();
        assert_eq!(state.statistics.succeeded, 5);
        assert_eq!(state.completed_buckets(), 1);
    }

    #[tokio::test]
    async fn test_release_and_reclaim() {
        let manager = manager();
        manager
            .initialize(&InputSpace::inclusive(1, 20), &BucketingSpecification::numeric(10))
            .await
            .unwrap();
        manager.get_next_bucket("w1").await.unwrap().unwrap();
        manager.get_next_bucket("w2").await.unwrap().unwrap();

        assert_eq!(manager.release_worker_buckets("w1").await.unwrap(), 1);
        assert_eq!(
            manager
                .reclaim_stale_buckets(Duration::from_secs(60))
                .await
                .unwrap(),
            0
        );
        assert_eq!(manager.reclaim_stale_buckets(Duration::ZERO).await.unwrap(), 1);

        let buckets = manager.buckets().await.unwrap();
        assert!(buckets.iter().all(|b| b.state == BucketState::Ready));
        assert!(buckets.iter().all(|b| b.worker_id.is_none()));
    }

    #[tokio::test]
    async fn test_wait_reports_all_complete_and_cancel() {
        let manager = manager().with_lease_timeout(Duration::from_secs(60));
        manager
            .initialize(&InputSpace::inclusive(1, 2), &BucketingSpecification::single())
            .await
            .unwrap();
        let cancel = CancellationToken::new();

        let acquired = manager.wait_for_next_bucket("w1", &cancel).await.unwrap();
        let BucketAcquisition::Bucket(bucket) = acquired else {
            panic!("expected a bucket");
        };

        let waiter = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                cancel.cancel();
            })
        };
        assert_eq!(
            manager.wait_for_next_bucket("w2", &cancel).await.unwrap(),
            BucketAcquisition::Cancelled
        );
        waiter.await.unwrap();

        manager
            .complete_bucket(&bucket, &ItemStatistics::default(), None)
            .await
            .unwrap();
        assert_eq!(
            manager
                .wait_for_next_bucket("w1", &CancellationToken::new())
                .await
                .unwrap(),
            BucketAcquisition::AllComplete
        );
    }
}
