//! Attribute filter correlator

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use govrun_activity::persistence::{ObjectStore, Query};

use crate::correlator::Correlator;
use crate::error::CorrelationError;
use crate::model::{
    Candidate, CorrelationContext, CorrelationResult, CorrelationState, OwnerRef, Subject,
};

/// Where a rule takes its value from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "from", rename_all = "snake_case")]
pub enum CorrelationSource {
    /// A subject attribute
    Attribute { name: String },
    /// The reference id resolved by a preceding external match
    ReferenceId,
}

/// One equality condition between the subject and its owner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemCorrelation {
    pub source: CorrelationSource,
    pub owner_attribute: String,
}

impl ItemCorrelation {
    /// Subject attribute `name` must equal owner attribute `owner_attribute`
    pub fn attribute(name: impl Into<String>, owner_attribute: impl Into<String>) -> Self {
        Self {
            source: CorrelationSource::Attribute { name: name.into() },
            owner_attribute: owner_attribute.into(),
        }
    }

    pub fn reference_id(owner_attribute: impl Into<String>) -> Self {
        Self {
            source: CorrelationSource::ReferenceId,
            owner_attribute: owner_attribute.into(),
        }
    }

    fn value(&self, subject: &Subject, state: &CorrelationState) -> Option<Value> {
        match &self.source {
            CorrelationSource::Attribute { name } => subject.attribute(name).cloned(),
            CorrelationSource::ReferenceId => state.reference_id.clone().map(Value::String),
        }
    }
}

/// Searches owners whose attributes equal the subject's
///
/// All rules must hold. No match gives `NoOwner`, one match gives
/// `ExistingOwner`, several give `Uncertain` with every match as a candidate.
pub struct FilterCorrelator {
    name: String,
    rules: Vec<ItemCorrelation>,
    owners: Arc<dyn ObjectStore>,
}

impl FilterCorrelator {
    pub fn new(
        name: impl Into<String>,
        rules: Vec<ItemCorrelation>,
        owners: Arc<dyn ObjectStore>,
    ) -> Result<Self, CorrelationError> {
        let name = name.into();
        if rules.is_empty() {
            return Err(CorrelationError::configuration(format!(
                "filter correlator '{name}' has no rules"
            )));
        }
        Ok(Self {
            name,
            rules,
            owners,
        })
    }

    fn query(&self, subject: &Subject, state: &CorrelationState) -> Option<Query> {
        let mut query = Query::new();
        for rule in &self.rules {
            query = query.eq(rule.owner_attribute.clone(), rule.value(subject, state)?);
        }
        Some(query)
    }
}

#[async_trait]
impl Correlator for FilterCorrelator {
    fn name(&self) -> &str {
        &self.name
    }

    async fn correlate(
        &self,
        subject: &Subject,
        ctx: &CorrelationContext,
        state: &mut CorrelationState,
    ) -> Result<CorrelationResult, CorrelationError> {
        let Some(query) = self.query(subject, state) else {
            debug!(
                correlator = %self.name,
                subject = %subject.id,
                "Correlation value missing, no owner"
            );
            return Ok(CorrelationResult::NoOwner);
        };

        let mut matches = self.owners.search(&ctx.owner_type, &query).await?;
        debug!(
            correlator = %self.name,
            subject = %subject.id,
            matches = matches.len(),
            "Filter correlation done"
        );

        match matches.len() {
            0 => Ok(CorrelationResult::NoOwner),
            1 => {
                let owner = matches.remove(0);
                Ok(CorrelationResult::existing(OwnerRef::new(
                    owner.object_type,
                    owner.id,
                )))
            }
            _ => Ok(CorrelationResult::uncertain(matches.into_iter().map(|owner| {
                Candidate::owner(OwnerRef::new(owner.object_type, owner.id))
                    .with_attributes(owner.attributes)
            }))),
        }
    }
}
