//! Progress reporting
//!
//! The execution framework reports per-item outcomes, per-bucket completion
//! and activity results to a [`ProgressSink`].

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace};

use crate::bucketing::Bucket;
use crate::definition::ActivityPath;
use crate::execution::ActivityExecutionResult;
use crate::processing::{ItemResultKind, ItemStatistics};

fn default_progress_interval() -> u64 {
    100
}

/// Per-activity reporting options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportingOptions {
    /// Log every item outcome at info level
    #[serde(default)]
    pub log_item_outcomes: bool,

    /// Log a progress line every this many finished items (0 disables)
    #[serde(default = "default_progress_interval")]
    pub progress_interval: u64,
}

impl Default for ReportingOptions {
    fn default() -> Self {
        Self {
            log_item_outcomes: false,
            progress_interval: default_progress_interval(),
        }
    }
}

impl ReportingOptions {
    pub fn with_item_logging(mut self, enabled: bool) -> Self {
        self.log_item_outcomes = enabled;
        self
    }

    pub fn with_progress_interval(mut self, interval: u64) -> Self {
        self.progress_interval = interval;
        self
    }
}

/// Outcome of one item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemEvent {
    pub path: ActivityPath,
    pub sequence: u64,
    pub key: Option<String>,
    pub bucket: Option<u32>,
    pub result: ItemResultKind,
    pub message: Option<String>,
}

/// Event recorded by [`RecordingProgressSink`]
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    Item(ItemEvent),
    BucketCompleted {
        path: ActivityPath,
        bucket: u32,
        statistics: ItemStatistics,
    },
    ActivityFinished(ActivityExecutionResult),
}

/// Receiver of progress events
pub trait ProgressSink: Send + Sync + 'static {
    fn item_processed(&self, event: &ItemEvent);

    fn bucket_completed(&self, path: &ActivityPath, bucket: &Bucket, statistics: &ItemStatistics);

    fn activity_finished(&self, result: &ActivityExecutionResult);
}

/// Reports progress through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingProgressSink;

impl ProgressSink for TracingProgressSink {
    fn item_processed(&self, event: &ItemEvent) {
        trace!(
            path = %event.path,
            sequence = event.sequence,
            key = event.key.as_deref(),
            result = ?event.result,
            "Item processed"
        );
    }

    fn bucket_completed(&self, path: &ActivityPath, bucket: &Bucket, statistics: &ItemStatistics) {
        debug!(
            path = %path,
            bucket = bucket.sequential_number,
            processed = statistics.processed,
            failed = statistics.failed,
            skipped = statistics.skipped,
            "Bucket complete"
        );
    }

    fn activity_finished(&self, result: &ActivityExecutionResult) {
        info!(
            path = %result.path,
            status = %result.status,
            partial_failure = result.partial_failure,
            processed = result.statistics.processed,
            succeeded = result.statistics.succeeded,
            failed = result.statistics.failed,
            skipped = result.statistics.skipped,
            "Activity finished"
        );
    }
}

/// Keeps every event in memory
#[derive(Debug, Default)]
pub struct RecordingProgressSink {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingProgressSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().clone()
    }

    pub fn item_events(&self) -> Vec<ItemEvent> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                ProgressEvent::Item(item) => Some(item.clone()),
                _ => None,
            })
            .collect()
    }

    /// Bucket numbers reported complete for `path`, in report order
    pub fn completed_buckets(&self, path: &ActivityPath) -> Vec<u32> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                ProgressEvent::BucketCompleted { path: p, bucket, .. } if p == path => Some(*bucket),
                _ => None,
            })
            .collect()
    }

    pub fn finished_activities(&self) -> Vec<ActivityExecutionResult> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                ProgressEvent::ActivityFinished(result) => Some(result.clone()),
                _ => None,
            })
            .collect()
    }
}

impl ProgressSink for RecordingProgressSink {
    fn item_processed(&self, event: &ItemEvent) {
        self.events.lock().push(ProgressEvent::Item(event.clone()));
    }

    fn bucket_completed(&self, path: &ActivityPath, bucket: &Bucket, statistics: &ItemStatistics) {
        self.events.lock().push(ProgressEvent::BucketCompleted {
            path: path.clone(),
            bucket: bucket.sequential_number,
            statistics: *statistics,
        });
    }

    fn activity_finished(&self, result: &ActivityExecutionResult) {
        self.events
            .lock()
            .push(ProgressEvent::ActivityFinished(result.clone()));
    }
}
