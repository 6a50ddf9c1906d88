//! Persisted per-activity work state document

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::bucketing::{Bucket, BucketState};
use crate::execution::ActivityStatus;
use crate::processing::ItemStatistics;

/// Resumable state of one activity, stored as the work-state document of its path
///
/// An empty document (`{}`) reads as a not-started activity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActivityState {
    #[serde(default)]
    pub status: ActivityStatus,

    /// Finished with failed or skipped items, or with non-fatal child failures
    #[serde(default)]
    pub partial_failure: bool,

    /// Bucket list; `None` until the bucket manager initialises it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buckets: Option<Vec<Bucket>>,

    /// Item counters accumulated over completed buckets
    #[serde(default)]
    pub statistics: ItemStatistics,

    /// Kind-specific resumption data (e.g. last processed sync token)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resumption: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_message: Option<String>,

    /// How many times the activity has been started
    #[serde(default)]
    pub run_count: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl ActivityState {
    /// Number of buckets in state `complete`
    pub fn completed_buckets(&self) -> usize {
        self.buckets
            .iter()
            .flatten()
            .filter(|b| b.state == BucketState::Complete)
            .count()
    }

    /// Reset for a rerun, keeping kind-specific resumption data
    pub fn reset_for_rerun(&mut self) {
        let resumption = self.resumption.take();
        let run_count = self.run_count;
        *self = Self {
            resumption,
            run_count,
            ..Self::default()
        };
    }
}
