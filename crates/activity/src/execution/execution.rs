//! Activity executions

use std::sync::Arc;

use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use tracing::{debug, info, instrument, warn};

use super::context::{ExecutionContext, LeafContext};
use super::result::{ActivityExecutionResult, RunOutcome};
use super::status::ActivityStatus;
use super::tree::{ActivityTree, NodeId};
use crate::bucketing::BucketError;
use crate::definition::{
    ActivityPath, CompositeWork, DefinitionError, FailurePropagation, RestartBehavior,
};
use crate::persistence::{ActivityState, WorkStateError, WorkStateHandle};
use crate::processing::ItemStatistics;

/// Unrecoverable errors of an activity execution
///
/// Item-level failures never surface here; they end up in
/// [`ActivityExecutionResult`].
#[derive(Debug, thiserror::Error)]
pub enum ActivityRunError {
    #[error(transparent)]
    Definition(#[from] DefinitionError),

    #[error(transparent)]
    WorkState(#[from] WorkStateError),

    #[error(transparent)]
    Bucket(#[from] BucketError),

    /// `execute()` called on an execution that already finished
    #[error("activity at {path} already finished with status {status}")]
    IllegalState {
        path: ActivityPath,
        status: ActivityStatus,
    },

    /// A status change the activity state machine does not allow
    #[error("activity at {path} cannot move from {from} to {to}")]
    IllegalTransition {
        path: ActivityPath,
        from: ActivityStatus,
        to: ActivityStatus,
    },

    /// The activity could not obtain its input
    #[error("item source of {path} failed: {message}")]
    ItemSource { path: ActivityPath, message: String },
}

impl ActivityRunError {
    pub fn item_source(path: &ActivityPath, message: impl Into<String>) -> Self {
        Self::ItemSource {
            path: path.clone(),
            message: message.into(),
        }
    }
}

fn ensure_transition(
    path: &ActivityPath,
    from: ActivityStatus,
    to: ActivityStatus,
) -> Result<(), ActivityRunError> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(ActivityRunError::IllegalTransition {
            path: path.clone(),
            from,
            to,
        })
    }
}

/// Runtime object for one run of one activity
///
/// Drives the activity's state machine and, for composites, the executions
/// of its children. Terminal states are write-once: executing a finished
/// execution again is an error.
pub struct ActivityExecution {
    tree: Arc<ActivityTree>,
    node: NodeId,
    status: ActivityStatus,
}

impl ActivityExecution {
    pub fn new(tree: Arc<ActivityTree>, node: NodeId) -> Self {
        Self {
            tree,
            node,
            status: ActivityStatus::NotStarted,
        }
    }

    pub fn status(&self) -> ActivityStatus {
        self.status
    }

    pub fn path(&self) -> &ActivityPath {
        self.tree.node(self.node).path()
    }

    /// Run the activity to a terminal status or to a cancellation point
    pub fn execute<'a>(
        &'a mut self,
        ctx: &'a ExecutionContext,
    ) -> BoxFuture<'a, Result<ActivityExecutionResult, ActivityRunError>> {
        async move {
            let result = self.execute_inner(ctx).await?;
            ctx.sink.activity_finished(&result);
            Ok(result)
        }
        .boxed()
    }

    #[instrument(skip(self, ctx), fields(task_id = %ctx.task_id, path = %self.path()))]
    async fn execute_inner(
        &mut self,
        ctx: &ExecutionContext,
    ) -> Result<ActivityExecutionResult, ActivityRunError> {
        if self.status.is_terminal() {
            return Err(ActivityRunError::IllegalState {
                path: self.path().clone(),
                status: self.status,
            });
        }

        let tree = self.tree.clone();
        let activity = tree.node(self.node);
        let path = activity.path().clone();
        let definition = activity.definition();
        let state = Arc::new(ctx.work_state(&path));

        if definition.control_flow.skip {
            state
                .update(|s| {
                    s.status = ActivityStatus::Skipped;
                    s.partial_failure = false;
                })
                .await?;
            self.status = ActivityStatus::Skipped;
            info!("Activity skipped by definition");
            return Ok(ActivityExecutionResult::finished(path, ActivityStatus::Skipped));
        }

        if let Some(result) = self.prepare_restart(ctx, &state, &path).await? {
            return Ok(result);
        }

        if ctx.is_cancelled() {
            let persisted = state.load().await?;
            return Ok(ActivityExecutionResult::interrupted(path, persisted.statistics));
        }

        let run_count = state
            .update(|s| {
                s.status = ActivityStatus::InProgress;
                s.run_count += 1;
                s.run_count
            })
            .await?;
        self.status = ActivityStatus::InProgress;
        info!(run = run_count, kind = %definition.kind, "Activity started");

        let finish = if activity.is_composite() {
            self.run_composite(ctx, &path).await?
        } else {
            self.run_leaf(ctx, &path, state.clone()).await?
        };

        let Finish {
            status,
            partial_failure,
            statistics,
            message,
            persist_statistics,
        } = finish;

        let Some(status) = status else {
            info!("Activity interrupted, work state kept for resumption");
            return Ok(ActivityExecutionResult::interrupted(path, statistics));
        };

        ensure_transition(&path, self.status, status)?;
        state
            .update(|s| {
                s.status = status;
                s.partial_failure = partial_failure;
                s.result_message = message.clone();
                if persist_statistics {
                    s.statistics = statistics;
                }
            })
            .await?;
        self.status = status;

        let mut result = ActivityExecutionResult::finished(path, status)
            .with_statistics(statistics)
            .with_partial_failure(partial_failure)
            .with_message(message);
        result.fatal = status == ActivityStatus::Failed
            && definition.control_flow.on_failure == FailurePropagation::Fatal;

        if status == ActivityStatus::Failed {
            warn!(message = result.message.as_deref(), "Activity failed");
        } else {
            debug!(status = %status, partial_failure, "Activity status persisted");
        }
        Ok(result)
    }

    /// Apply the restart behavior to a persisted status from an earlier run
    ///
    /// Returns the result to report when the activity must not run again.
    async fn prepare_restart(
        &mut self,
        ctx: &ExecutionContext,
        state: &WorkStateHandle,
        path: &ActivityPath,
    ) -> Result<Option<ActivityExecutionResult>, ActivityRunError> {
        let restart = self.tree.node(self.node).definition().control_flow.restart;
        let persisted = state.load().await?;

        match (persisted.status, restart) {
            (ActivityStatus::Complete | ActivityStatus::Skipped, RestartBehavior::SkipCompleted) => {
                debug!(status = %persisted.status, "Activity already finished, not running again");
                self.status = persisted.status;
                Ok(Some(Self::persisted_result(path, &persisted)))
            }
            (ActivityStatus::Complete | ActivityStatus::Skipped, RestartBehavior::RerunCompleted) => {
                debug!("Resetting finished activity for a new run");
                state.update(ActivityState::reset_for_rerun).await?;
                self.reset_subtree_for_rerun(ctx, path).await?;
                Ok(None)
            }
            (ActivityStatus::Failed, _) => {
                debug!("Running failed activity again, keeping completed buckets");
                state
                    .update(|s| {
                        s.status = ActivityStatus::NotStarted;
                        s.partial_failure = false;
                        s.result_message = None;
                    })
                    .await?;
                Ok(None)
            }
            _ => Ok(None),
        }
    }

    /// Composites rerun as a whole: every descendant starts from scratch too
    async fn reset_subtree_for_rerun(
        &self,
        ctx: &ExecutionContext,
        path: &ActivityPath,
    ) -> Result<(), ActivityRunError> {
        let descendants: Vec<_> = self
            .tree
            .iter()
            .filter(|(id, node)| *id != self.node && node.path().starts_with(path))
            .map(|(_, node)| node.path().clone())
            .collect();

        for descendant in descendants {
            ctx.work_state(&descendant)
                .update(ActivityState::reset_for_rerun)
                .await?;
        }
        Ok(())
    }

    fn persisted_result(path: &ActivityPath, state: &ActivityState) -> ActivityExecutionResult {
        ActivityExecutionResult::finished(path.clone(), state.status)
            .with_statistics(state.statistics)
            .with_partial_failure(state.partial_failure)
            .with_message(state.result_message.clone())
    }

    async fn run_leaf(
        &self,
        ctx: &ExecutionContext,
        path: &ActivityPath,
        state: Arc<WorkStateHandle>,
    ) -> Result<Finish, ActivityRunError> {
        let definition = self.tree.node(self.node).definition();
        let handler = ctx.registry.require(&definition.kind, path)?;
        let leaf = handler.instantiate_execution(definition, path)?;

        let leaf_ctx = LeafContext {
            execution: ctx,
            path,
            definition,
            state,
            reporting: definition
                .reporting
                .clone()
                .unwrap_or_else(|| handler.default_reporting_options()),
            default_error_action: handler.default_error_action(),
        };
        let report = leaf.run(&leaf_ctx).await?;

        let status = match (&report.stop_reason, report.interrupted) {
            (Some(_), _) => Some(ActivityStatus::Failed),
            (None, true) => None,
            (None, false) => Some(ActivityStatus::Complete),
        };

        Ok(Finish {
            status,
            partial_failure: report.statistics.has_problems(),
            statistics: report.statistics,
            message: report.stop_reason,
            persist_statistics: false,
        })
    }

    async fn run_composite(
        &self,
        ctx: &ExecutionContext,
        path: &ActivityPath,
    ) -> Result<Finish, ActivityRunError> {
        let activity = self.tree.node(self.node);
        let work: CompositeWork = activity.definition().work_as(path)?;
        let children = activity.children().to_vec();
        let mut aggregate = CompositeAggregate::default();

        if work.parallel {
            let mut executions: Vec<_> = children
                .iter()
                .map(|child| ActivityExecution::new(self.tree.clone(), *child))
                .collect();
            let results = join_all(executions.iter_mut().map(|e| e.execute(ctx))).await;
            for result in results {
                aggregate.add(result?);
            }
        } else {
            for child in children {
                if ctx.is_cancelled() {
                    aggregate.interrupted = true;
                    break;
                }
                let mut execution = ActivityExecution::new(self.tree.clone(), child);
                let result = execution.execute(ctx).await?;
                aggregate.add(result);
                if aggregate.fatal_failure.is_some() || aggregate.interrupted {
                    break;
                }
            }
        }

        let status = if aggregate.fatal_failure.is_some() {
            Some(ActivityStatus::Failed)
        } else if aggregate.interrupted {
            None
        } else {
            Some(ActivityStatus::Complete)
        };

        Ok(Finish {
            status,
            partial_failure: aggregate.partial_failure,
            statistics: aggregate.statistics,
            message: aggregate.fatal_failure,
            persist_statistics: true,
        })
    }
}

/// Final status of a run; `status = None` means interrupted
struct Finish {
    status: Option<ActivityStatus>,
    partial_failure: bool,
    statistics: ItemStatistics,
    message: Option<String>,
    /// Leaves keep their per-bucket statistics; composites store the aggregate
    persist_statistics: bool,
}

#[derive(Default)]
struct CompositeAggregate {
    statistics: ItemStatistics,
    partial_failure: bool,
    fatal_failure: Option<String>,
    interrupted: bool,
}

impl CompositeAggregate {
    fn add(&mut self, result: ActivityExecutionResult) {
        self.statistics.merge(&result.statistics);

        if result.outcome == RunOutcome::Interrupted {
            self.interrupted = true;
            return;
        }

        match result.status {
            ActivityStatus::Failed if result.fatal => {
                if self.fatal_failure.is_none() {
                    self.fatal_failure = Some(format!(
                        "child {} failed: {}",
                        result.path,
                        result.message.as_deref().unwrap_or("no details")
                    ));
                }
            }
            ActivityStatus::Failed => self.partial_failure = true,
            _ => self.partial_failure |= result.partial_failure,
        }
    }
}
