//! Correlator trait

use async_trait::async_trait;

use crate::error::CorrelationError;
use crate::model::{CaseDecision, CorrelationContext, CorrelationResult, CorrelationState, Subject};

/// Decides whether a subject belongs to a known owner
///
/// Implementations must be idempotent with respect to `state`: when the
/// state already carries a resolved answer, a second call short-circuits to
/// it instead of asking external services again.
#[async_trait]
pub trait Correlator: Send + Sync + 'static {
    /// Name used in logs and case records
    fn name(&self) -> &str;

    async fn correlate(
        &self,
        subject: &Subject,
        ctx: &CorrelationContext,
        state: &mut CorrelationState,
    ) -> Result<CorrelationResult, CorrelationError>;

    /// Report a human decision on an uncertain result back to the correlator
    ///
    /// Correlators without external collaborators have nothing to report.
    async fn resolve(
        &self,
        _subject: &Subject,
        _ctx: &CorrelationContext,
        _state: &mut CorrelationState,
        _decision: &CaseDecision,
    ) -> Result<(), CorrelationError> {
        Ok(())
    }

    /// Whether `resolve` has anything to report for this state
    fn handles_decision(&self, _state: &CorrelationState) -> bool {
        false
    }
}
