//! Correlator configuration and registry

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use govrun_activity::persistence::ObjectStore;

use crate::correlator::Correlator;
use crate::correlators::{
    CombinationPolicy, CompositeCorrelator, FilterCorrelator, IdMatchCorrelator, IdMatchSettings,
    ItemCorrelation, NoOpCorrelator,
};
use crate::error::CorrelationError;
use crate::match_service::MatchService;

/// Correlator configuration, a tagged union over the correlator kinds
///
/// # Example
///
/// ```
/// use govrun_correlation::CorrelatorConfiguration;
/// use serde_json::json;
///
/// let config: CorrelatorConfiguration = serde_json::from_value(json!({
///     "type": "composite",
///     "policy": "first_definite",
///     "members": [
///         {"type": "filter", "rules": [{"source": {"from": "attribute", "name": "mail"}, "owner_attribute": "email"}]},
///         {"type": "none"}
///     ]
/// }))
/// .unwrap();
/// assert_eq!(config.kind(), "composite");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CorrelatorConfiguration {
    None {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    Filter {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        rules: Vec<ItemCorrelation>,
    },
    Composite {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        /// Required; there is no implicit combination policy
        policy: CombinationPolicy,
        members: Vec<CorrelatorConfiguration>,
    },
    IdMatch {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(flatten)]
        settings: IdMatchSettings,
        #[serde(default)]
        follow_on: Vec<CorrelatorConfiguration>,
    },
    /// Kind provided by a registered [`CorrelatorFactory`]
    Custom {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        kind: String,
        #[serde(default)]
        config: Value,
    },
}

impl CorrelatorConfiguration {
    /// Kind name, the factory kind for custom correlators
    pub fn kind(&self) -> &str {
        match self {
            Self::None { .. } => "none",
            Self::Filter { .. } => "filter",
            Self::Composite { .. } => "composite",
            Self::IdMatch { .. } => "id_match",
            Self::Custom { kind, .. } => kind,
        }
    }

    /// Configured name, defaulting to the kind
    pub fn name(&self) -> String {
        let name = match self {
            Self::None { name }
            | Self::Filter { name, .. }
            | Self::Composite { name, .. }
            | Self::IdMatch { name, .. }
            | Self::Custom { name, .. } => name,
        };
        name.clone().unwrap_or_else(|| self.kind().to_string())
    }
}

/// Creates correlators of one custom kind
pub trait CorrelatorFactory: Send + Sync + 'static {
    fn kind(&self) -> &str;

    fn create(
        &self,
        name: &str,
        config: &Value,
        registry: &CorrelatorRegistry,
    ) -> Result<Arc<dyn Correlator>, CorrelationError>;
}

/// Resolves correlator configurations to instances
///
/// Built once at process start with the collaborators correlators need and
/// passed by reference.
#[derive(Clone)]
pub struct CorrelatorRegistry {
    owners: Arc<dyn ObjectStore>,
    match_service: Option<Arc<dyn MatchService>>,
    factories: HashMap<String, Arc<dyn CorrelatorFactory>>,
}

impl CorrelatorRegistry {
    /// Registry whose filter correlators search `owners`
    pub fn new(owners: Arc<dyn ObjectStore>) -> Self {
        Self {
            owners,
            match_service: None,
            factories: HashMap::new(),
        }
    }

    pub fn with_match_service(mut self, service: Arc<dyn MatchService>) -> Self {
        self.match_service = Some(service);
        self
    }

    pub fn with_factory(mut self, factory: impl CorrelatorFactory) -> Self {
        self.register(factory);
        self
    }

    pub fn register(&mut self, factory: impl CorrelatorFactory) {
        let kind = factory.kind().to_string();
        if self.factories.insert(kind.clone(), Arc::new(factory)).is_some() {
            warn!(kind = %kind, "Replaced correlator factory");
        }
    }

    pub fn owners(&self) -> &Arc<dyn ObjectStore> {
        &self.owners
    }

    pub fn instantiate(
        &self,
        config: &CorrelatorConfiguration,
    ) -> Result<Arc<dyn Correlator>, CorrelationError> {
        let name = config.name();
        debug!(kind = config.kind(), name = %name, "Instantiating correlator");

        let correlator: Arc<dyn Correlator> = match config {
            CorrelatorConfiguration::None { .. } => Arc::new(NoOpCorrelator::new(name)),
            CorrelatorConfiguration::Filter { rules, .. } => {
                Arc::new(FilterCorrelator::new(name, rules.clone(), self.owners.clone())?)
            }
            CorrelatorConfiguration::Composite {
                policy, members, ..
            } => {
                let members = members
                    .iter()
                    .map(|member| self.instantiate(member))
                    .collect::<Result<Vec<_>, _>>()?;
                Arc::new(CompositeCorrelator::new(name, members, *policy)?)
            }
            CorrelatorConfiguration::IdMatch {
                settings,
                follow_on,
                ..
            } => {
                let service = self.match_service.clone().ok_or_else(|| {
                    CorrelationError::configuration(format!(
                        "id match correlator '{name}' configured but no match service is available"
                    ))
                })?;
                let follow_on = follow_on
                    .iter()
                    .map(|member| self.instantiate(member))
                    .collect::<Result<Vec<_>, _>>()?;
                Arc::new(IdMatchCorrelator::new(name, settings.clone(), follow_on, service)?)
            }
            CorrelatorConfiguration::Custom { kind, config, .. } => {
                let factory = self.factories.get(kind).ok_or_else(|| {
                    CorrelationError::configuration(format!("unknown correlator kind '{kind}'"))
                })?;
                factory.create(&name, config, self)?
            }
        };
        Ok(correlator)
    }
}
