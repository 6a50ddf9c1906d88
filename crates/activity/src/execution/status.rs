//! Activity execution status

use std::fmt;

use serde::{Deserialize, Serialize};

/// Status of an activity: `not_started -> in_progress -> {complete, failed, skipped}`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityStatus {
    #[default]
    NotStarted,
    InProgress,
    Complete,
    Failed,
    Skipped,
}

impl ActivityStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed | Self::Skipped)
    }

    /// Whether an execution may move from `self` to `next`
    ///
    /// Terminal states are write-once.
    pub fn can_transition_to(self, next: ActivityStatus) -> bool {
        match self {
            Self::NotStarted => matches!(next, Self::InProgress | Self::Skipped),
            Self::InProgress => matches!(next, Self::Complete | Self::Failed),
            Self::Complete | Self::Failed | Self::Skipped => false,
        }
    }
}

impl fmt::Display for ActivityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotStarted => write!(f, "not_started"),
            Self::InProgress => write!(f, "in_progress"),
            Self::Complete => write!(f, "complete"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}
