//! Activity definitions

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::{ActivityPath, ControlFlowSpecification, DistributionSpecification};
use crate::reporting::ReportingOptions;

/// Kind name of the built-in composite activity
pub const COMPOSITE_KIND: &str = "composite";

/// Errors in activity definitions
#[derive(Debug, thiserror::Error)]
pub enum DefinitionError {
    /// No handler registered for the activity kind
    #[error("unknown activity kind '{kind}' at {path}")]
    UnknownKind { kind: String, path: ActivityPath },

    /// Two siblings share an identifier
    #[error("duplicate activity identifier '{identifier}' under {parent}")]
    DuplicateIdentifier {
        identifier: String,
        parent: ActivityPath,
    },

    /// Empty identifier or one containing the path separator
    #[error("invalid activity identifier '{0}'")]
    InvalidIdentifier(String),

    /// A non-composite activity declares children
    #[error("activity at {0} is not composite but has children")]
    ChildrenOnLeaf(ActivityPath),

    /// Kind-specific parameters could not be parsed or were rejected
    #[error("invalid work definition for '{kind}' at {path}: {reason}")]
    InvalidWorkDefinition {
        kind: String,
        path: ActivityPath,
        reason: String,
    },

    /// Path does not name an activity of the tree
    #[error("no activity at path {0}")]
    PathNotFound(ActivityPath),
}

/// Work definition of the built-in composite kind
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompositeWork {
    /// Run children concurrently instead of in definition order
    #[serde(default)]
    pub parallel: bool,
}

/// Immutable definition of one activity and its children
///
/// The definition is the tagged union `{ kind, work, control_flow }`: `kind`
/// selects the registered handler and `work` carries its kind-specific
/// parameters as JSON.
///
/// # Example
///
/// ```
/// use govrun_activity::ActivityDefinition;
/// use serde_json::json;
///
/// let definition = ActivityDefinition::composite(
///     "reconciliation",
///     vec![
///         ActivityDefinition::new("import", "mock_iterative", json!({"from": 1, "to": 10})),
///         ActivityDefinition::new("correlate", "correlation", json!({})),
///     ],
/// );
///
/// assert!(definition.is_composite());
/// assert_eq!(definition.children.len(), 2);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityDefinition {
    /// Identifier, unique among siblings; the path segment of this activity
    pub identifier: String,

    /// Activity kind (handler lookup key)
    pub kind: String,

    /// Kind-specific parameters
    #[serde(default)]
    pub work: serde_json::Value,

    #[serde(default)]
    pub control_flow: ControlFlowSpecification,

    #[serde(default)]
    pub distribution: DistributionSpecification,

    /// Overrides the handler's default reporting options
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reporting: Option<ReportingOptions>,

    /// Ordered child definitions (composites only)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ActivityDefinition>,
}

impl ActivityDefinition {
    /// Create a leaf definition
    pub fn new(identifier: impl Into<String>, kind: impl Into<String>, work: serde_json::Value) -> Self {
        Self {
            identifier: identifier.into(),
            kind: kind.into(),
            work,
            control_flow: ControlFlowSpecification::default(),
            distribution: DistributionSpecification::default(),
            reporting: None,
            children: Vec::new(),
        }
    }

    /// Create a sequential composite definition
    pub fn composite(identifier: impl Into<String>, children: Vec<ActivityDefinition>) -> Self {
        Self {
            children,
            ..Self::new(identifier, COMPOSITE_KIND, serde_json::json!({}))
        }
    }

    /// Create a composite whose children run concurrently
    pub fn parallel_composite(identifier: impl Into<String>, children: Vec<ActivityDefinition>) -> Self {
        Self {
            children,
            ..Self::new(identifier, COMPOSITE_KIND, serde_json::json!({ "parallel": true }))
        }
    }

    pub fn with_control_flow(mut self, control_flow: ControlFlowSpecification) -> Self {
        self.control_flow = control_flow;
        self
    }

    pub fn with_distribution(mut self, distribution: DistributionSpecification) -> Self {
        self.distribution = distribution;
        self
    }

    pub fn with_reporting(mut self, reporting: ReportingOptions) -> Self {
        self.reporting = Some(reporting);
        self
    }

    pub fn is_composite(&self) -> bool {
        self.kind == COMPOSITE_KIND
    }

    /// Deserialize the work definition into the kind's parameter type
    pub fn work_as<T: DeserializeOwned>(&self, path: &ActivityPath) -> Result<T, DefinitionError> {
        let work = if self.work.is_null() {
            serde_json::json!({})
        } else {
            self.work.clone()
        };
        serde_json::from_value(work).map_err(|e| DefinitionError::InvalidWorkDefinition {
            kind: self.kind.clone(),
            path: path.clone(),
            reason: e.to_string(),
        })
    }

    pub(crate) fn without_children(&self) -> Self {
        Self {
            identifier: self.identifier.clone(),
            kind: self.kind.clone(),
            work: self.work.clone(),
            control_flow: self.control_flow.clone(),
            distribution: self.distribution.clone(),
            reporting: self.reporting.clone(),
            children: Vec::new(),
        }
    }

    pub(crate) fn validate_identifier(&self) -> Result<(), DefinitionError> {
        if self.identifier.is_empty() || self.identifier.contains('/') {
            return Err(DefinitionError::InvalidIdentifier(self.identifier.clone()));
        }
        Ok(())
    }
}
