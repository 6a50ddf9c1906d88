//! Correlation service: a correlator plus its case handling

use std::sync::Arc;

use tracing::{info, instrument};

use crate::case::CaseManager;
use crate::correlator::Correlator;
use crate::error::CorrelationError;
use crate::model::{CaseDecision, CorrelationContext, CorrelationResult, CorrelationState, Subject};

/// Runs one correlator and keeps the subject's case in step with its result
///
/// An uncertain result opens (or refreshes) the subject's case; a definite
/// one closes any case left open by an earlier pass.
#[derive(Clone)]
pub struct CorrelationService {
    correlator: Arc<dyn Correlator>,
    cases: Arc<dyn CaseManager>,
}

impl CorrelationService {
    pub fn new(correlator: Arc<dyn Correlator>, cases: Arc<dyn CaseManager>) -> Self {
        Self { correlator, cases }
    }

    pub fn correlator(&self) -> &Arc<dyn Correlator> {
        &self.correlator
    }

    pub fn cases(&self) -> &Arc<dyn CaseManager> {
        &self.cases
    }

    #[instrument(skip(self, subject, ctx, state), fields(subject = %subject.id, correlator = self.correlator.name()))]
    pub async fn correlate(
        &self,
        subject: &Subject,
        ctx: &CorrelationContext,
        state: &mut CorrelationState,
    ) -> Result<CorrelationResult, CorrelationError> {
        let result = self.correlator.correlate(subject, ctx, state).await?;

        match &result {
            CorrelationResult::Uncertain { candidates } => {
                self.cases.create_or_update_case(subject, candidates).await?;
            }
            CorrelationResult::NoOwner | CorrelationResult::ExistingOwner { .. } => {
                self.cases.close_case_if_exists(subject, None).await?;
            }
        }
        Ok(result)
    }

    /// Apply the human decision encoded as `outcome` to the subject's case
    ///
    /// The decision is recorded in `state`; callers persist it with the
    /// subject (see [`CorrelationProcessor::resolve_case`]).
    ///
    /// [`CorrelationProcessor::resolve_case`]: crate::processor::CorrelationProcessor::resolve_case
    #[instrument(skip(self, subject, ctx, state), fields(subject = %subject.id))]
    pub async fn resolve_case(
        &self,
        subject: &Subject,
        ctx: &CorrelationContext,
        state: &mut CorrelationState,
        outcome: &str,
    ) -> Result<CaseDecision, CorrelationError> {
        let decision = CaseDecision::parse(outcome)?;
        self.correlator.resolve(subject, ctx, state, &decision).await?;
        state.decision = Some(decision.encode());
        let closed = self.cases.close_case_if_exists(subject, Some(&decision)).await?;

        info!(
            outcome = %outcome,
            case_id = ?closed.map(|c| c.id),
            "Correlation case resolved"
        );
        Ok(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::case::InMemoryCaseManager;
    use crate::correlators::{FilterCorrelator, ItemCorrelation};
    use govrun_activity::persistence::Record;
    use govrun_activity::InMemoryObjectStore;

    fn service(cases: Arc<InMemoryCaseManager>) -> CorrelationService {
        let owners = Arc::new(InMemoryObjectStore::with_records([
            Record::new("user", "u1").with_attribute("family_name", "Doe"),
            Record::new("user", "u2").with_attribute("family_name", "Doe"),
            Record::new("user", "u3").with_attribute("family_name", "Roe"),
        ]));
        let correlator = FilterCorrelator::new(
            "surname",
            vec![ItemCorrelation::attribute("surname", "family_name")],
            owners,
        )
        .unwrap();
        CorrelationService::new(Arc::new(correlator), cases)
    }

    #[tokio::test]
    async fn test_uncertain_opens_single_case() {
        let cases = Arc::new(InMemoryCaseManager::new());
        let service = service(cases.clone());
        let subject = Subject::new("s1").with_attribute("surname", "Doe");
        let ctx = CorrelationContext::new("user");

        for _ in 0..3 {
            let result = service
                .correlate(&subject, &ctx, &mut CorrelationState::default())
                .await
                .unwrap();
            assert!(result.is_uncertain());
        }
        assert_eq!(cases.open_case_count(), 1);
    }

    #[tokio::test]
    async fn test_definite_result_closes_case() {
        let cases = Arc::new(InMemoryCaseManager::new());
        let service = service(cases.clone());
        let ctx = CorrelationContext::new("user");

        let uncertain = Subject::new("s1").with_attribute("surname", "Doe");
        service
            .correlate(&uncertain, &ctx, &mut CorrelationState::default())
            .await
            .unwrap();

        // the subject was renamed at its source
        let renamed = Subject::new("s1").with_attribute("surname", "Roe");
        let result = service
            .correlate(&renamed, &ctx, &mut CorrelationState::default())
            .await
            .unwrap();
        assert_eq!(result.owner().map(|o| o.id.as_str()), Some("u3"));
        assert_eq!(cases.open_case_count(), 0);
    }

    #[tokio::test]
    async fn test_resolve_case_decodes_outcome() {
        let cases = Arc::new(InMemoryCaseManager::new());
        let service = service(cases.clone());
        let subject = Subject::new("s1").with_attribute("surname", "Doe");
        let ctx = CorrelationContext::new("user");
        let mut state = CorrelationState::default();
        service.correlate(&subject, &ctx, &mut state).await.unwrap();

        let err = service
            .resolve_case(&subject, &ctx, &mut state, "bogus")
            .await
            .unwrap_err();
        assert!(matches!(err, CorrelationError::Schema(_)));
        assert_eq!(cases.open_case_count(), 1);

        let decision = service
            .resolve_case(&subject, &ctx, &mut state, "option:u2")
            .await
            .unwrap();
        assert_eq!(decision, CaseDecision::Candidate("u2".into()));
        assert_eq!(state.decision.as_deref(), Some("option:u2"));
        let case = cases.latest_case("s1").unwrap();
        assert_eq!(case.outcome.as_deref(), Some("option:u2"));
        assert!(!case.is_open());
    }
}
