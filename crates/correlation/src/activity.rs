//! The `correlation` activity kind
//!
//! Feeds subjects through a [`CorrelationProcessor`], either from a change
//! stream (one open bucket, resumable by change token) or by scanning every
//! shadow (enumerated buckets of shadow ids).

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use govrun_activity::bucketing::{Bucket, BucketRange, InputSpace};
use govrun_activity::execution::{
    ActivityHandler, ActivityRunError, ItemSink, IterativeActivity, IterativeRun, LeafContext,
    LeafExecution,
};
use govrun_activity::persistence::{ObjectStore, Query};
use govrun_activity::processing::{ErrorReaction, ErrorState, ExhaustedAction, ItemProcessor};
use govrun_activity::{ActivityDefinition, ActivityPath, DefinitionError, RetryPolicy};

use crate::case::CaseManager;
use crate::model::CorrelationContext;
use crate::processor::{CorrelationProcessor, MappingStrength};
use crate::registry::{CorrelatorConfiguration, CorrelatorRegistry};
use crate::service::CorrelationService;
use crate::source::{ChangeRecord, ChangeSource};

/// Kind name of the correlation activity
pub const CORRELATION_KIND: &str = "correlation";

fn default_shadow_type() -> String {
    "shadow".to_string()
}

fn default_batch_size() -> usize {
    100
}

/// Where the correlation activity takes its subjects from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "from", rename_all = "snake_case")]
pub enum CorrelationInput {
    /// Changes of the configured change source, after the last processed token
    Changes {
        #[serde(default = "default_batch_size")]
        batch_size: usize,
    },
    /// Every shadow of the shadow type
    Subjects,
}

impl Default for CorrelationInput {
    fn default() -> Self {
        Self::Changes {
            batch_size: default_batch_size(),
        }
    }
}

/// Work definition of the `correlation` kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationWork {
    pub correlator: CorrelatorConfiguration,
    /// Object type of the owners (e.g. `user`)
    pub owner_type: String,
    #[serde(default = "default_shadow_type")]
    pub shadow_type: String,
    #[serde(default)]
    pub resource: String,
    #[serde(default)]
    pub object_type: String,
    #[serde(default)]
    pub input: CorrelationInput,
    #[serde(default)]
    pub mapping_strength: MappingStrength,
}

/// Resumption data of the change-stream input
#[derive(Debug, Default, Serialize, Deserialize)]
struct ChangeCursor {
    token: Option<String>,
}

impl ChangeCursor {
    fn from_resumption(resumption: Option<Value>) -> Self {
        resumption
            .and_then(|value| serde_json::from_value(value).ok())
            .unwrap_or_default()
    }

    fn to_value(&self) -> Value {
        json!({ "token": self.token })
    }
}

/// [`ActivityHandler`] of the `correlation` kind
pub struct CorrelationHandler {
    correlators: CorrelatorRegistry,
    cases: Arc<dyn CaseManager>,
    shadows: Arc<dyn ObjectStore>,
    changes: Option<Arc<dyn ChangeSource>>,
}

impl CorrelationHandler {
    pub fn new(
        correlators: CorrelatorRegistry,
        cases: Arc<dyn CaseManager>,
        shadows: Arc<dyn ObjectStore>,
    ) -> Self {
        Self {
            correlators,
            cases,
            shadows,
            changes: None,
        }
    }

    pub fn with_change_source(mut self, changes: Arc<dyn ChangeSource>) -> Self {
        self.changes = Some(changes);
        self
    }

    fn invalid(path: &ActivityPath, reason: impl ToString) -> DefinitionError {
        DefinitionError::InvalidWorkDefinition {
            kind: CORRELATION_KIND.to_string(),
            path: path.clone(),
            reason: reason.to_string(),
        }
    }
}

impl ActivityHandler for CorrelationHandler {
    fn kind(&self) -> &str {
        CORRELATION_KIND
    }

    fn instantiate_execution(
        &self,
        definition: &ActivityDefinition,
        path: &ActivityPath,
    ) -> Result<Box<dyn LeafExecution>, DefinitionError> {
        let work: CorrelationWork = definition.work_as(path)?;
        let correlator = self
            .correlators
            .instantiate(&work.correlator)
            .map_err(|e| Self::invalid(path, e))?;

        let changes = match (&work.input, &self.changes) {
            (CorrelationInput::Changes { batch_size: 0 }, _) => {
                return Err(Self::invalid(path, "batch_size must be at least 1"));
            }
            (CorrelationInput::Changes { .. }, None) => {
                return Err(Self::invalid(path, "no change source available"));
            }
            (CorrelationInput::Changes { .. }, Some(changes)) => Some(changes.clone()),
            (CorrelationInput::Subjects, _) => None,
        };

        let context = CorrelationContext::new(work.owner_type.clone())
            .with_resource(work.resource.clone())
            .with_object_type(work.object_type.clone());
        let processor = CorrelationProcessor::new(
            CorrelationService::new(correlator, self.cases.clone()),
            self.shadows.clone(),
            work.shadow_type.clone(),
            context,
        )
        .with_mapping_strength(work.mapping_strength);

        Ok(Box::new(IterativeRun::new(CorrelationActivity {
            path: path.clone(),
            input: work.input,
            shadow_type: work.shadow_type,
            shadows: self.shadows.clone(),
            changes,
            processor: Arc::new(processor),
        })))
    }

    /// Transient failures (match service, store) are retried, then counted as failed
    fn default_error_action(&self) -> ErrorReaction {
        ErrorReaction::retry_later(RetryPolicy::default(), ExhaustedAction::Continue)
    }
}

struct CorrelationActivity {
    path: ActivityPath,
    input: CorrelationInput,
    shadow_type: String,
    shadows: Arc<dyn ObjectStore>,
    changes: Option<Arc<dyn ChangeSource>>,
    processor: Arc<CorrelationProcessor>,
}

impl CorrelationActivity {
    async fn produce_changes(
        &self,
        changes: &dyn ChangeSource,
        batch_size: usize,
        resumption: Option<Value>,
        sink: &ItemSink<'_, ChangeRecord>,
    ) -> Result<Option<Value>, ActivityRunError> {
        let mut cursor = ChangeCursor::from_resumption(resumption);
        debug!(path = %self.path, token = ?cursor.token, "Reading changes");

        loop {
            if sink.is_cancelled() {
                return Ok(None);
            }
            let batch = changes
                .fetch_changes(cursor.token.as_deref(), batch_size)
                .await
                .map_err(|e| ActivityRunError::item_source(&self.path, e.to_string()))?;
            let Some(last) = batch.last() else {
                info!(path = %self.path, token = ?cursor.token, "Change stream drained");
                return Ok(Some(cursor.to_value()));
            };
            let next_token = last.token.clone();

            for change in batch {
                let key = format!("{}@{}", change.subject_id, change.token);
                let error_state = change.error_state.clone();
                if !sink.submit_with(change, key, error_state).await {
                    return Ok(None);
                }
            }

            cursor.token = Some(next_token);
            if !sink.checkpoint(cursor.to_value()).await? {
                return Ok(None);
            }
        }
    }
}

#[async_trait]
impl IterativeActivity for CorrelationActivity {
    type Item = ChangeRecord;

    async fn input_space(&self, ctx: &LeafContext<'_>) -> Result<InputSpace, ActivityRunError> {
        if let CorrelationInput::Changes { .. } = self.input {
            return Ok(InputSpace::Unbounded);
        }

        // a resumed scan keeps the subject list it started with
        let state = ctx.state.load().await?;
        if let Some(buckets) = state.buckets {
            let values = buckets
                .into_iter()
                .flat_map(|bucket| match bucket.range {
                    BucketRange::Enumerated { values } => values,
                    BucketRange::Numeric { .. } => Vec::new(),
                })
                .collect();
            return Ok(InputSpace::Enumerated { values });
        }

        let subjects = self
            .shadows
            .search(&self.shadow_type, &Query::new())
            .await
            .map_err(|e| ActivityRunError::item_source(ctx.path, e.to_string()))?;
        info!(path = %ctx.path, subjects = subjects.len(), "Scanning subjects");
        Ok(InputSpace::Enumerated {
            values: subjects.into_iter().map(|record| record.id).collect(),
        })
    }

    async fn produce(
        &self,
        bucket: &Bucket,
        resumption: Option<Value>,
        sink: &ItemSink<'_, ChangeRecord>,
    ) -> Result<Option<Value>, ActivityRunError> {
        match (&self.input, &bucket.range) {
            (CorrelationInput::Changes { batch_size }, _) => match &self.changes {
                Some(changes) => {
                    self.produce_changes(changes.as_ref(), *batch_size, resumption, sink)
                        .await
                }
                None => Ok(None),
            },
            (CorrelationInput::Subjects, BucketRange::Enumerated { values }) => {
                for subject_id in values {
                    let change = ChangeRecord::resync(subject_id.clone());
                    if !sink.submit_with(change, subject_id.clone(), ErrorState::Success).await {
                        break;
                    }
                }
                Ok(None)
            }
            (CorrelationInput::Subjects, BucketRange::Numeric { .. }) => Ok(None),
        }
    }

    fn processor(&self) -> Arc<dyn ItemProcessor<ChangeRecord>> {
        self.processor.clone()
    }
}
