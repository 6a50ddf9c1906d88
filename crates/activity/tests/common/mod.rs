//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use govrun_activity::bucketing::{Bucket, BucketRange, InputSpace};
use govrun_activity::execution::{
    ActivityHandler, ActivityRunError, ItemSink, IterativeActivity, IterativeRun, LeafContext,
    LeafExecution,
};
use govrun_activity::persistence::{ActivityState, InMemoryWorkStateStore};
use govrun_activity::processing::{ErrorReaction, ItemProcessor};
use govrun_activity::{ActivityDefinition, ActivityPath, DefinitionError};

#[derive(Debug, Deserialize)]
struct RangeWork {
    from: u64,
    to: u64,
}

/// Iterates `from..=to` and hands each number to a shared processor
pub struct RangeActivity {
    from: u64,
    to: u64,
    processor: Arc<dyn ItemProcessor<u64>>,
}

#[async_trait]
impl IterativeActivity for RangeActivity {
    type Item = u64;

    async fn input_space(&self, _ctx: &LeafContext<'_>) -> Result<InputSpace, ActivityRunError> {
        Ok(InputSpace::inclusive(self.from, self.to))
    }

    async fn produce(
        &self,
        bucket: &Bucket,
        _resumption: Option<Value>,
        sink: &ItemSink<'_, u64>,
    ) -> Result<Option<Value>, ActivityRunError> {
        if let BucketRange::Numeric { from, to: Some(to) } = &bucket.range {
            for n in *from..*to {
                if !sink.submit(n).await {
                    break;
                }
            }
        }
        Ok(None)
    }

    fn processor(&self) -> Arc<dyn ItemProcessor<u64>> {
        self.processor.clone()
    }
}

/// `range` activity kind backed by a test processor
pub struct RangeHandler {
    kind: String,
    processor: Arc<dyn ItemProcessor<u64>>,
    default_error_action: ErrorReaction,
}

impl RangeHandler {
    pub fn new(processor: Arc<dyn ItemProcessor<u64>>) -> Self {
        Self {
            kind: "range".to_string(),
            processor,
            default_error_action: ErrorReaction::Continue,
        }
    }

    pub fn with_kind(mut self, kind: &str) -> Self {
        self.kind = kind.to_string();
        self
    }

    pub fn with_default_error_action(mut self, reaction: ErrorReaction) -> Self {
        self.default_error_action = reaction;
        self
    }
}

impl ActivityHandler for RangeHandler {
    fn kind(&self) -> &str {
        &self.kind
    }

    fn instantiate_execution(
        &self,
        definition: &ActivityDefinition,
        path: &ActivityPath,
    ) -> Result<Box<dyn LeafExecution>, DefinitionError> {
        let work: RangeWork = definition.work_as(path)?;
        Ok(Box::new(IterativeRun::new(RangeActivity {
            from: work.from,
            to: work.to,
            processor: self.processor.clone(),
        })))
    }

    fn default_error_action(&self) -> ErrorReaction {
        self.default_error_action.clone()
    }
}

/// Numbers seen by a processor, in processing order
#[derive(Default, Clone)]
pub struct Seen(Arc<Mutex<Vec<u64>>>);

impl Seen {
    pub fn push(&self, n: u64) {
        self.0.lock().push(n);
    }

    pub fn sorted(&self) -> Vec<u64> {
        let mut seen = self.0.lock().clone();
        seen.sort_unstable();
        seen
    }

    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    pub fn clear(&self) {
        self.0.lock().clear();
    }
}

/// Persisted activity state at `path`
pub fn state_at(store: &InMemoryWorkStateStore, task_id: Uuid, path: &ActivityPath) -> ActivityState {
    let document = store
        .document(task_id, path)
        .expect("no work state persisted for path");
    serde_json::from_value(document.document).unwrap()
}
