//! `mock_iterative` activity kind
//!
//! Iterates over the integers `from..=to` and logs `message` with each one.
//! Useful for exercising bucketing, worker pools and resumption without a
//! real resource behind the activity.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use govrun_activity::bucketing::{Bucket, BucketRange, InputSpace};
use govrun_activity::execution::{ItemSink, LeafContext, LeafExecution};
use govrun_activity::processing::{processor_fn, ItemOutcome};
use govrun_activity::{
    ActivityDefinition, ActivityHandler, ActivityPath, ActivityRunError, DefinitionError,
    ItemProcessingRequest, ItemProcessor, IterativeActivity, IterativeRun,
};

pub const MOCK_ITERATIVE_KIND: &str = "mock_iterative";

fn default_message() -> String {
    "Processing item ".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct MockIterativeWork {
    pub from: u64,
    pub to: u64,
    #[serde(default = "default_message")]
    pub message: String,
}

struct MockIterativeActivity {
    work: MockIterativeWork,
    processor: Arc<dyn ItemProcessor<u64>>,
}

#[async_trait]
impl IterativeActivity for MockIterativeActivity {
    type Item = u64;

    async fn input_space(&self, _ctx: &LeafContext<'_>) -> Result<InputSpace, ActivityRunError> {
        Ok(InputSpace::inclusive(self.work.from, self.work.to))
    }

    async fn produce(
        &self,
        bucket: &Bucket,
        _resumption: Option<Value>,
        sink: &ItemSink<'_, u64>,
    ) -> Result<Option<Value>, ActivityRunError> {
        if let BucketRange::Numeric { from, to } = &bucket.range {
            let end = to.unwrap_or(self.work.to.saturating_add(1));
            for item in *from..end {
                if !sink.submit(item).await {
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

/// Handler of the `mock_iterative` kind
#[derive(Debug, Default)]
pub struct MockIterativeHandler;

impl ActivityHandler for MockIterativeHandler {
    fn kind(&self) -> &str {
        MOCK_ITERATIVE_KIND
    }

    fn instantiate_execution(
        &self,
        definition: &ActivityDefinition,
        path: &ActivityPath,
    ) -> Result<Box<dyn LeafExecution>, DefinitionError> {
        let work: MockIterativeWork = definition.work_as(path)?;
        if work.from > work.to {
            return Err(DefinitionError::InvalidWorkDefinition {
                kind: MOCK_ITERATIVE_KIND.to_string(),
                path: path.clone(),
                reason: format!("from ({}) is greater than to ({})", work.from, work.to),
            });
        }

        let message = work.message.clone();
        let processor = processor_fn(move |request: ItemProcessingRequest<u64>| {
            let message = message.clone();
            async move {
                info!(item = request.item, bucket = ?request.bucket, "{}{}", message, request.item);
                Ok(ItemOutcome::Success)
            }
        });

        Ok(Box::new(IterativeRun::new(MockIterativeActivity {
            work,
            processor: Arc::new(processor),
        })))
    }
}
