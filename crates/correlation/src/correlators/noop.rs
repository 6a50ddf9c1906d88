use async_trait::async_trait;

use crate::correlator::Correlator;
use crate::error::CorrelationError;
use crate::model::{CorrelationContext, CorrelationResult, CorrelationState, Subject};

/// Never finds an owner
#[derive(Debug, Clone)]
pub struct NoOpCorrelator {
    name: String,
}

impl NoOpCorrelator {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Default for NoOpCorrelator {
    fn default() -> Self {
        Self::new("none")
    }
}

#[async_trait]
impl Correlator for NoOpCorrelator {
    fn name(&self) -> &str {
        &self.name
    }

    async fn correlate(
        &self,
        _subject: &Subject,
        _ctx: &CorrelationContext,
        _state: &mut CorrelationState,
    ) -> Result<CorrelationResult, CorrelationError> {
        Ok(CorrelationResult::NoOwner)
    }
}
