//! Activity handlers and their registry

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use super::context::LeafContext;
use super::execution::ActivityRunError;
use crate::definition::{ActivityDefinition, ActivityPath, DefinitionError, COMPOSITE_KIND};
use crate::processing::{ErrorReaction, ItemStatistics};
use crate::reporting::ReportingOptions;

/// What a leaf run reports back to its activity execution
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LeafReport {
    /// Item statistics of the activity
    pub statistics: ItemStatistics,
    /// The error handling strategy stopped processing
    pub stop_reason: Option<String>,
    /// Cancelled before all input was processed
    pub interrupted: bool,
}

/// Runtime behavior of a leaf activity kind
#[async_trait]
pub trait LeafExecution: Send + Sync {
    async fn run(&self, ctx: &LeafContext<'_>) -> Result<LeafReport, ActivityRunError>;
}

/// An activity kind: `{instantiate_execution, default_reporting_options, default_error_action}`
///
/// # Example
///
/// ```ignore
/// struct ImportHandler;
///
/// impl ActivityHandler for ImportHandler {
///     fn kind(&self) -> &str {
///         "import"
///     }
///
///     fn instantiate_execution(
///         &self,
///         definition: &ActivityDefinition,
///         path: &ActivityPath,
///     ) -> Result<Box<dyn LeafExecution>, DefinitionError> {
///         let work: ImportWork = definition.work_as(path)?;
///         Ok(Box::new(IterativeRun::new(ImportActivity::new(work))))
///     }
/// }
/// ```
pub trait ActivityHandler: Send + Sync + 'static {
    /// Kind name used in activity definitions
    fn kind(&self) -> &str;

    /// Create the runtime execution for a definition of this kind
    fn instantiate_execution(
        &self,
        definition: &ActivityDefinition,
        path: &ActivityPath,
    ) -> Result<Box<dyn LeafExecution>, DefinitionError>;

    /// Check a definition when the activity tree is built
    fn validate(
        &self,
        definition: &ActivityDefinition,
        path: &ActivityPath,
    ) -> Result<(), DefinitionError> {
        self.instantiate_execution(definition, path).map(|_| ())
    }

    fn default_reporting_options(&self) -> ReportingOptions {
        ReportingOptions::default()
    }

    /// Reaction to failed items when the definition's strategy names none
    fn default_error_action(&self) -> ErrorReaction {
        ErrorReaction::Continue
    }
}

/// Registry of activity handlers, keyed by kind
///
/// Built once at process start and passed by reference. The `composite`
/// kind is built in and cannot be registered.
#[derive(Default, Clone)]
pub struct ActivityHandlerRegistry {
    handlers: HashMap<String, Arc<dyn ActivityHandler>>,
}

impl ActivityHandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any previous handler of the same kind
    pub fn register(&mut self, handler: impl ActivityHandler) {
        let kind = handler.kind().to_string();
        if kind == COMPOSITE_KIND {
            warn!("Ignoring handler for the built-in composite kind");
            return;
        }
        if self.handlers.insert(kind.clone(), Arc::new(handler)).is_some() {
            warn!(kind = %kind, "Replaced activity handler");
        }
    }

    pub fn with_handler(mut self, handler: impl ActivityHandler) -> Self {
        self.register(handler);
        self
    }

    pub fn get(&self, kind: &str) -> Option<Arc<dyn ActivityHandler>> {
        self.handlers.get(kind).cloned()
    }

    /// Handler for `kind`, or [`DefinitionError::UnknownKind`]
    pub fn require(
        &self,
        kind: &str,
        path: &ActivityPath,
    ) -> Result<Arc<dyn ActivityHandler>, DefinitionError> {
        self.get(kind).ok_or_else(|| DefinitionError::UnknownKind {
            kind: kind.to_string(),
            path: path.clone(),
        })
    }

    pub fn contains(&self, kind: &str) -> bool {
        kind == COMPOSITE_KIND || self.handlers.contains_key(kind)
    }

    /// Registered kinds, sorted
    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<_> = self.handlers.keys().cloned().collect();
        kinds.sort();
        kinds
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopRun;

    #[async_trait]
    impl LeafExecution for NoopRun {
        async fn run(&self, _ctx: &LeafContext<'_>) -> Result<LeafReport, ActivityRunError> {
            Ok(LeafReport::default())
        }
    }

    struct NoopHandler(&'static str);

    impl ActivityHandler for NoopHandler {
        fn kind(&self) -> &str {
            self.0
        }

        fn instantiate_execution(
            &self,
            _definition: &ActivityDefinition,
            _path: &ActivityPath,
        ) -> Result<Box<dyn LeafExecution>, DefinitionError> {
            Ok(Box::new(NoopRun))
        }
    }

    #[test]
    fn test_register_and_require() {
        let registry = ActivityHandlerRegistry::new()
            .with_handler(NoopHandler("noop"))
            .with_handler(NoopHandler(COMPOSITE_KIND));

        assert_eq!(registry.kinds(), vec!["noop".to_string()]);
        assert!(registry.contains(COMPOSITE_KIND));
        assert!(registry.require("noop", &ActivityPath::root()).is_ok());
        assert!(matches!(
            registry.require("missing", &ActivityPath::root()),
            Err(DefinitionError::UnknownKind { .. })
        ));
    }
}
