//! Activity definitions
//!
//! Definitions are the static, read-only description of a task's work:
//! - [`ActivityDefinition`] - kind, kind-specific work parameters, children
//! - [`ControlFlowSpecification`] - error handling, failure propagation, restart behavior
//! - [`DistributionSpecification`] - buckets, worker pool size, queue capacity
//! - [`ActivityPath`] - persistence key of a node

mod activity;
mod control_flow;
mod path;

pub use activity::{ActivityDefinition, CompositeWork, DefinitionError, COMPOSITE_KIND};
pub use control_flow::{
    ControlFlowSpecification, DistributionSpecification, FailurePropagation, RestartBehavior,
};
pub use path::ActivityPath;
