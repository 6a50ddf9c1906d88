//! Activity execution results

use serde::{Deserialize, Serialize};

use super::status::ActivityStatus;
use crate::definition::ActivityPath;
use crate::processing::ItemStatistics;

/// Whether an execution reached a terminal status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Finished,
    /// Stopped at a cancellation point; the work state stays resumable
    Interrupted,
}

/// Result of one `execute()` call
///
/// Item-level failures are captured here, never raised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityExecutionResult {
    pub path: ActivityPath,
    pub status: ActivityStatus,
    pub outcome: RunOutcome,
    /// Finished with failed or skipped items, or non-fatal child failures
    pub partial_failure: bool,
    /// A failure that must fail the parent composite
    pub fatal: bool,
    pub statistics: ItemStatistics,
    pub message: Option<String>,
}

impl ActivityExecutionResult {
    pub fn finished(path: ActivityPath, status: ActivityStatus) -> Self {
        Self {
            path,
            status,
            outcome: RunOutcome::Finished,
            partial_failure: false,
            fatal: false,
            statistics: ItemStatistics::default(),
            message: None,
        }
    }

    pub fn interrupted(path: ActivityPath, statistics: ItemStatistics) -> Self {
        Self {
            path,
            status: ActivityStatus::InProgress,
            outcome: RunOutcome::Interrupted,
            partial_failure: false,
            fatal: false,
            statistics,
            message: None,
        }
    }

    pub fn with_statistics(mut self, statistics: ItemStatistics) -> Self {
        self.statistics = statistics;
        self
    }

    pub fn with_partial_failure(mut self, partial_failure: bool) -> Self {
        self.partial_failure = partial_failure;
        self
    }

    pub fn with_message(mut self, message: Option<String>) -> Self {
        self.message = message;
        self
    }

    pub fn is_interrupted(&self) -> bool {
        self.outcome == RunOutcome::Interrupted
    }

    pub fn is_complete(&self) -> bool {
        self.status == ActivityStatus::Complete
    }
}
