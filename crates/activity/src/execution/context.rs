//! Execution contexts and settings

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::handler::ActivityHandlerRegistry;
use crate::definition::{ActivityDefinition, ActivityPath};
use crate::persistence::{WorkStateHandle, WorkStateStore};
use crate::processing::ErrorReaction;
use crate::reliability::{duration_millis, PollBackoff};
use crate::reporting::{ProgressSink, ReportingOptions};

/// Process-level execution settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSettings {
    /// Bucket delegations older than this are reclaimed
    #[serde(with = "duration_millis")]
    pub lease_timeout: Duration,

    /// Polling while every remaining bucket is delegated to other workers
    #[serde(default)]
    pub bucket_poll: PollBackoff,

    /// Conditional-write retries on work-state version conflicts
    pub max_conflict_retries: u32,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            lease_timeout: Duration::from_secs(300),
            bucket_poll: PollBackoff::default(),
            max_conflict_retries: 16,
        }
    }
}

impl ExecutionSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lease_timeout(mut self, timeout: Duration) -> Self {
        self.lease_timeout = timeout;
        self
    }

    pub fn with_bucket_poll(mut self, poll: PollBackoff) -> Self {
        self.bucket_poll = poll;
        self
    }

    pub fn with_max_conflict_retries(mut self, retries: u32) -> Self {
        self.max_conflict_retries = retries;
        self
    }

    /// Lease renewal period for buckets being processed
    pub fn heartbeat_interval(&self) -> Duration {
        (self.lease_timeout / 3).max(Duration::from_millis(10))
    }
}

/// Everything an execution needs from the hosting task
#[derive(Clone)]
pub struct ExecutionContext {
    pub task_id: Uuid,
    pub worker_id: String,
    pub store: Arc<dyn WorkStateStore>,
    pub registry: Arc<ActivityHandlerRegistry>,
    pub sink: Arc<dyn ProgressSink>,
    pub cancellation: CancellationToken,
    pub settings: ExecutionSettings,
}

impl ExecutionContext {
    pub fn work_state(&self, path: &ActivityPath) -> WorkStateHandle {
        WorkStateHandle::new(self.store.clone(), self.task_id, path.clone())
            .with_max_conflict_retries(self.settings.max_conflict_retries)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

/// Context of one leaf activity execution
pub struct LeafContext<'a> {
    pub execution: &'a ExecutionContext,
    pub path: &'a ActivityPath,
    pub definition: &'a ActivityDefinition,
    pub state: Arc<WorkStateHandle>,
    /// Reporting options after applying the definition's override
    pub reporting: ReportingOptions,
    /// Handler's error reaction for when the strategy names none
    pub default_error_action: ErrorReaction,
}
