//! External ID match correlator

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Map;
use tracing::{debug, info};

use crate::correlator::Correlator;
use crate::error::CorrelationError;
use crate::match_service::{MatchRequest, MatchService};
use crate::model::{
    CaseDecision, Candidate, CorrelationContext, CorrelationResult, CorrelationState, Subject,
};

/// Settings of [`IdMatchCorrelator`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdMatchSettings {
    /// System-of-record label sent with every request
    pub sor_label: String,
    /// Subject attributes sent to the service; all when empty
    #[serde(default)]
    pub attributes: Vec<String>,
}

/// Asks an external match service for the subject's reference id
///
/// A definite reference id is turned into an owner by the single follow-on
/// correlator. A fuzzy answer is remembered in the correlation state and
/// returned as `Uncertain`, always including a "new identity" option.
pub struct IdMatchCorrelator {
    name: String,
    settings: IdMatchSettings,
    follow_on: Arc<dyn Correlator>,
    service: Arc<dyn MatchService>,
}

impl IdMatchCorrelator {
    /// Fails unless exactly one follow-on correlator is given
    pub fn new(
        name: impl Into<String>,
        settings: IdMatchSettings,
        follow_on: Vec<Arc<dyn Correlator>>,
        service: Arc<dyn MatchService>,
    ) -> Result<Self, CorrelationError> {
        let name = name.into();
        if settings.sor_label.is_empty() {
            return Err(CorrelationError::configuration(format!(
                "id match correlator '{name}' has no sor_label"
            )));
        }
        let [follow_on]: [Arc<dyn Correlator>; 1] = follow_on.try_into().map_err(|v: Vec<_>| {
            CorrelationError::configuration(format!(
                "id match correlator '{name}' needs exactly one follow-on correlator, got {}",
                v.len()
            ))
        })?;

        Ok(Self {
            name,
            settings,
            follow_on,
            service,
        })
    }

    fn request(&self, subject: &Subject) -> MatchRequest {
        let attributes = if self.settings.attributes.is_empty() {
            subject.attributes.clone()
        } else {
            self.settings
                .attributes
                .iter()
                .filter_map(|name| Some((name.clone(), subject.attribute(name)?.clone())))
                .collect::<Map<_, _>>()
        };
        MatchRequest {
            sor_label: self.settings.sor_label.clone(),
            sor_id: subject.id.clone(),
            attributes,
        }
    }
}

#[async_trait]
impl Correlator for IdMatchCorrelator {
    fn name(&self) -> &str {
        &self.name
    }

    async fn correlate(
        &self,
        subject: &Subject,
        ctx: &CorrelationContext,
        state: &mut CorrelationState,
    ) -> Result<CorrelationResult, CorrelationError> {
        if state.reference_id.is_some() {
            debug!(correlator = %self.name, subject = %subject.id, "Reference id known, skipping match");
            return self.follow_on.correlate(subject, ctx, state).await;
        }

        let response = self.service.execute_match(&self.request(subject)).await?;

        if let Some(reference_id) = response.reference_id {
            debug!(
                correlator = %self.name,
                subject = %subject.id,
                reference_id = %reference_id,
                "Definite match"
            );
            state.reference_id = Some(reference_id);
            state.match_request_id = None;
            return self.follow_on.correlate(subject, ctx, state).await;
        }

        info!(
            correlator = %self.name,
            subject = %subject.id,
            match_request = ?response.match_request_id,
            candidates = response.candidates.len(),
            "Fuzzy match, human decision needed"
        );
        state.match_request_id = response.match_request_id;

        let mut candidates: Vec<Candidate> = response
            .candidates
            .into_iter()
            .map(|potential| {
                let candidate = match (&potential.reference_id, potential.is_new_identity()) {
                    (Some(reference_id), false) => Candidate::reference(reference_id.clone()),
                    _ => Candidate::none_of_the_above(),
                };
                let candidate = candidate.with_attributes(potential.attributes);
                match potential.confidence {
                    Some(confidence) => candidate.with_confidence(confidence),
                    None => candidate,
                }
            })
            .collect();
        if !candidates.iter().any(|c| c.new_identity) {
            candidates.push(Candidate::none_of_the_above().with_attributes(subject.attributes.clone()));
        }

        Ok(CorrelationResult::uncertain(candidates))
    }

    async fn resolve(
        &self,
        subject: &Subject,
        _ctx: &CorrelationContext,
        state: &mut CorrelationState,
        decision: &CaseDecision,
    ) -> Result<(), CorrelationError> {
        let match_request_id = state.match_request_id.clone().ok_or_else(|| {
            CorrelationError::schema(format!("no match request id recorded for subject '{}'", subject.id))
        })?;

        let reference_id = self
            .service
            .resolve(&self.request(subject), &match_request_id, decision.chosen_id())
            .await?;

        info!(
            correlator = %self.name,
            subject = %subject.id,
            decision = %decision.encode(),
            reference_id = ?reference_id,
            "Match request resolved"
        );
        state.reference_id = reference_id.or_else(|| decision.chosen_id().map(str::to_string));
        state.match_request_id = None;
        Ok(())
    }

    fn handles_decision(&self, state: &CorrelationState) -> bool {
        state.match_request_id.is_some()
    }
}
