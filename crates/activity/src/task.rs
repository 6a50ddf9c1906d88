//! Task runner
//!
//! Builds the activity tree of a task, resolves the local root from the
//! persisted task document and executes that subtree.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};
use uuid::Uuid;

use crate::definition::{ActivityDefinition, ActivityPath, DefinitionError};
use crate::execution::{
    ActivityExecution, ActivityExecutionResult, ActivityHandlerRegistry, ActivityRunError,
    ActivityStatus, ActivityTree, ExecutionContext, ExecutionSettings,
};
use crate::persistence::{ActivityState, StoreError, WorkStateStore};
use crate::processing::ItemStatistics;
use crate::reporting::{ProgressSink, TracingProgressSink};

/// Task-level errors
#[derive(Debug, thiserror::Error)]
pub enum TaskRunError {
    /// The activity tree could not be built
    #[error("task initialization failed: {0}")]
    Initialization(#[from] DefinitionError),

    #[error("work state store error: {0}")]
    Store(#[from] StoreError),

    #[error("activity execution failed: {0}")]
    Execution(#[from] ActivityRunError),
}

impl TaskRunError {
    /// Whether running the task again cannot succeed without a fix
    pub fn is_permanent(&self) -> bool {
        match self {
            Self::Initialization(_) => true,
            Self::Execution(ActivityRunError::Definition(_)) => true,
            Self::Execution(ActivityRunError::IllegalState { .. }) => true,
            Self::Execution(ActivityRunError::IllegalTransition { .. }) => true,
            Self::Execution(ActivityRunError::WorkState(
                crate::persistence::WorkStateError::Corrupted { .. },
            )) => true,
            Self::Execution(ActivityRunError::Bucket(crate::bucketing::BucketError::LayoutMismatch {
                ..
            })) => true,
            _ => false,
        }
    }
}

/// How a task run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskRunStatus {
    /// The local root reached a terminal status
    Finished,
    /// Cancelled; the persisted work state allows resuming
    Interrupted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRunResult {
    pub task_id: Uuid,
    pub status: TaskRunStatus,
    /// Result of the local root activity
    pub root: ActivityExecutionResult,
}

/// Persisted progress of one activity, for status polling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityProgress {
    pub path: ActivityPath,
    pub status: ActivityStatus,
    pub partial_failure: bool,
    pub statistics: ItemStatistics,
    pub buckets_total: usize,
    pub buckets_complete: usize,
}

/// Runs tasks against a work-state store and a handler registry
///
/// # Example
///
/// ```ignore
/// let runner = TaskRunner::new(store, Arc::new(registry))
///     .with_settings(ExecutionSettings::new().with_lease_timeout(Duration::from_secs(60)));
///
/// let result = runner
///     .run(task_id, &definition, "worker-1", CancellationToken::new())
///     .await?;
/// ```
#[derive(Clone)]
pub struct TaskRunner {
    store: Arc<dyn WorkStateStore>,
    registry: Arc<ActivityHandlerRegistry>,
    sink: Arc<dyn ProgressSink>,
    settings: ExecutionSettings,
}

impl TaskRunner {
    pub fn new(store: Arc<dyn WorkStateStore>, registry: Arc<ActivityHandlerRegistry>) -> Self {
        Self {
            store,
            registry,
            sink: Arc::new(TracingProgressSink),
            settings: ExecutionSettings::default(),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_settings(mut self, settings: ExecutionSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Execute the task's local root to completion or cancellation
    #[instrument(skip(self, definition, cancellation), fields(%task_id, worker_id = %worker_id))]
    pub async fn run(
        &self,
        task_id: Uuid,
        definition: &ActivityDefinition,
        worker_id: &str,
        cancellation: CancellationToken,
    ) -> Result<TaskRunResult, TaskRunError> {
        let mut tree = ActivityTree::build(task_id, definition, &self.registry).map_err(|e| {
            error!(%task_id, "Invalid task definition: {}", e);
            e
        })?;

        let local_root = match self.store.task_local_root(task_id).await? {
            Some(path) => path,
            None => {
                let root = ActivityPath::root();
                self.store.set_task_local_root(task_id, &root).await?;
                root
            }
        };
        let node = tree.set_local_root(&local_root)?;

        info!(
            %task_id,
            local_root = %local_root,
            activities = tree.len(),
            "Task started"
        );

        let ctx = ExecutionContext {
            task_id,
            worker_id: worker_id.to_string(),
            store: self.store.clone(),
            registry: self.registry.clone(),
            sink: self.sink.clone(),
            cancellation,
            settings: self.settings.clone(),
        };

        let mut execution = ActivityExecution::new(Arc::new(tree), node);
        let root = execution.execute(&ctx).await.map_err(|e| {
            error!(%task_id, "Task execution failed: {}", e);
            e
        })?;

        let status = if root.is_interrupted() {
            TaskRunStatus::Interrupted
        } else {
            TaskRunStatus::Finished
        };
        info!(
            %task_id,
            status = ?status,
            root_status = %root.status,
            partial_failure = root.partial_failure,
            "Task run ended"
        );

        Ok(TaskRunResult {
            task_id,
            status,
            root,
        })
    }

    /// Make `path` the subtree executed by the next run of the task
    pub async fn assign_local_root(
        &self,
        task_id: Uuid,
        path: &ActivityPath,
    ) -> Result<(), TaskRunError> {
        self.store.set_task_local_root(task_id, path).await?;
        Ok(())
    }

    /// Persisted progress of every activity of a task that has work state
    pub async fn progress(&self, task_id: Uuid) -> Result<Vec<ActivityProgress>, TaskRunError> {
        let documents = self.store.list_work_states(task_id).await?;
        let mut progress = Vec::with_capacity(documents.len());

        for (path, document) in documents {
            let state: ActivityState = serde_json::from_value(document.document)
                .map_err(|e| StoreError::Serialization(format!("work state at {path}: {e}")))?;
            progress.push(ActivityProgress {
                buckets_total: state.buckets.as_ref().map_or(0, Vec::len),
                buckets_complete: state.completed_buckets(),
                path,
                status: state.status,
                partial_failure: state.partial_failure,
                statistics: state.statistics,
            });
        }
        Ok(progress)
    }
}
