//! # Resumable Activity Execution
//!
//! Runs long-lived synchronization and governance jobs as trees of
//! activities whose progress survives crashes and restarts.
//!
//! ## Features
//!
//! - **Activity trees**: composite activities sequence (or parallelise) their children;
//!   leaves are pluggable kinds resolved through an explicit handler registry
//! - **Resumable work state**: one versioned document per activity path, written with
//!   compare-and-swap so several worker processes can share a task
//! - **Buckets**: the input space of an iterative activity is partitioned into claimable
//!   buckets; a completed bucket is never processed again
//! - **Bounded worker pool**: items flow through a bounded queue with backpressure, and
//!   every failure is routed through a configurable error handling strategy
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        TaskRunner                            │
//! │  (builds the ActivityTree, executes the local root)         │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    ActivityExecution                         │
//! │  (state machine; composites drive child executions)         │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ leaf
//!                              ▼
//! ┌──────────────────────────────┐  ┌──────────────────────────┐
//! │         BucketManager        │  │ ItemProcessingCoordinator │
//! │ (claims buckets through the  │  │ (worker pool + error      │
//! │  work state, CAS + leases)   │  │  handling strategy)       │
//! └──────────────────────────────┘  └──────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     WorkStateStore                           │
//! │  (in-memory or PostgreSQL: govrun_activity_work_state)      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use govrun_activity::prelude::*;
//!
//! let registry = ActivityHandlerRegistry::new().with_handler(ImportHandler);
//! let runner = TaskRunner::new(Arc::new(InMemoryWorkStateStore::new()), Arc::new(registry));
//!
//! let definition = ActivityDefinition::composite(
//!     "nightly",
//!     vec![ActivityDefinition::new("import", "import", json!({"resource": "hr"}))],
//! );
//! let result = runner
//!     .run(Uuid::now_v7(), &definition, "worker-1", CancellationToken::new())
//!     .await?;
//! ```

pub mod bucketing;
pub mod definition;
pub mod execution;
pub mod persistence;
pub mod processing;
pub mod reliability;
pub mod reporting;
pub mod task;

/// Prelude for common imports
pub mod prelude {
    pub use crate::bucketing::{Bucket, BucketRange, BucketingSpecification, InputSpace};
    pub use crate::definition::{
        ActivityDefinition, ActivityPath, ControlFlowSpecification, DefinitionError,
        DistributionSpecification, FailurePropagation, RestartBehavior,
    };
    pub use crate::execution::{
        ActivityExecutionResult, ActivityHandler, ActivityHandlerRegistry, ActivityRunError,
        ActivityStatus, ExecutionSettings, ItemSink, IterativeActivity, IterativeRun,
        LeafContext, LeafExecution,
    };
    pub use crate::persistence::{
        InMemoryObjectStore, InMemoryWorkStateStore, ObjectStore, PostgresWorkStateStore,
        StoreError, WorkStateStore,
    };
    pub use crate::processing::{
        ErrorCategory, ErrorHandlingEntry, ErrorHandlingStrategy, ErrorReaction, ErrorSituation,
        ErrorState, ExhaustedAction, ItemError, ItemOutcome, ItemProcessingRequest,
        ItemProcessor, ItemStatistics, WorkerContext,
    };
    pub use crate::reliability::RetryPolicy;
    pub use crate::reporting::{ProgressSink, RecordingProgressSink, TracingProgressSink};
    pub use crate::task::{TaskRunError, TaskRunResult, TaskRunStatus, TaskRunner};
}

// Re-export key types at crate root
pub use definition::{ActivityDefinition, ActivityPath, DefinitionError};
pub use execution::{
    ActivityExecutionResult, ActivityHandler, ActivityHandlerRegistry, ActivityRunError,
    ActivityStatus, ExecutionSettings, IterativeActivity, IterativeRun,
};
pub use persistence::{
    InMemoryObjectStore, InMemoryWorkStateStore, PostgresWorkStateStore, StoreError,
    WorkStateStore,
};
pub use processing::{ItemError, ItemOutcome, ItemProcessingRequest, ItemProcessor};
pub use reliability::RetryPolicy;
pub use task::{TaskRunError, TaskRunResult, TaskRunner};
