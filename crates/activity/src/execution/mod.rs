//! Activity execution
//!
//! - [`ActivityTree`] - arena of activity nodes built from a definition
//! - [`ActivityExecution`] - state machine of one activity run; composites
//!   drive their children's executions
//! - [`ActivityHandler`] / [`ActivityHandlerRegistry`] - pluggable leaf kinds
//! - [`IterativeRun`] - bucketed leaf execution over an [`IterativeActivity`]

mod context;
#[allow(clippy::module_inception)]
mod execution;
mod handler;
mod iterative;
mod result;
mod status;
mod tree;

pub use context::{ExecutionContext, ExecutionSettings, LeafContext};
pub use execution::{ActivityExecution, ActivityRunError};
pub use handler::{ActivityHandler, ActivityHandlerRegistry, LeafExecution, LeafReport};
pub use iterative::{ItemSink, IterativeActivity, IterativeRun};
pub use result::{ActivityExecutionResult, RunOutcome};
pub use status::ActivityStatus;
pub use tree::{Activity, ActivityTree, NodeId};
