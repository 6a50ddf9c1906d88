//! Control flow and distribution parts of an activity definition

use serde::{Deserialize, Serialize};

use crate::bucketing::BucketingSpecification;
use crate::processing::ErrorHandlingStrategy;

/// How a failed activity affects its parent composite
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePropagation {
    /// The parent fails immediately; later siblings are not started
    #[default]
    Fatal,
    /// The parent proceeds and finishes with the partial-failure flag
    Continue,
}

/// What to do with an activity persisted as finished when the task runs again
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestartBehavior {
    /// Complete and skipped activities keep their result; failed ones run again
    #[default]
    SkipCompleted,
    /// Every finished activity is reset and runs again (recurring jobs).
    /// Kind-specific resumption data such as a sync token survives the reset.
    RerunCompleted,
}

/// Control flow specification of an activity
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ControlFlowSpecification {
    /// Per-item error handling; the handler's default error action applies when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_handling: Option<ErrorHandlingStrategy>,

    #[serde(default)]
    pub on_failure: FailurePropagation,

    #[serde(default)]
    pub restart: RestartBehavior,

    /// Mark the activity skipped without running it
    #[serde(default)]
    pub skip: bool,
}

impl ControlFlowSpecification {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_error_handling(mut self, strategy: ErrorHandlingStrategy) -> Self {
        self.error_handling = Some(strategy);
        self
    }

    pub fn with_on_failure(mut self, propagation: FailurePropagation) -> Self {
        self.on_failure = propagation;
        self
    }

    pub fn with_restart(mut self, restart: RestartBehavior) -> Self {
        self.restart = restart;
        self
    }

    pub fn skipped(mut self) -> Self {
        self.skip = true;
        self
    }
}

fn default_true() -> bool {
    true
}

fn default_workers() -> usize {
    1
}

fn default_queue_capacity() -> usize {
    100
}

/// How an iterative activity spreads its items over buckets and workers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributionSpecification {
    #[serde(default)]
    pub buckets: BucketingSpecification,

    /// Wait for a bucket to complete before claiming the next one
    #[serde(default = "default_true")]
    pub sequential_buckets: bool,

    /// Size of the item processing worker pool
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Capacity of the item queue; producers block when it is full
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for DistributionSpecification {
    fn default() -> Self {
        Self {
            buckets: BucketingSpecification::default(),
            sequential_buckets: true,
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl DistributionSpecification {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_buckets(mut self, buckets: BucketingSpecification) -> Self {
        self.buckets = buckets;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    pub fn with_sequential_buckets(mut self, sequential: bool) -> Self {
        self.sequential_buckets = sequential;
        self
    }
}
