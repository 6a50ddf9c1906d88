//! Correlation item processor

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, instrument};

use govrun_activity::persistence::{ItemDelta, ObjectStore, Record};
use govrun_activity::processing::{
    ItemError, ItemOutcome, ItemProcessingRequest, ItemProcessor, WorkerContext,
};

use crate::error::CorrelationError;
use crate::model::{CaseDecision, CorrelationContext, CorrelationResult, CorrelationState, Subject};
use crate::service::CorrelationService;
use crate::source::{ChangeKind, ChangeRecord};

/// Shadow attribute holding the correlation situation
pub const SITUATION_ATTRIBUTE: &str = "correlation_situation";
/// Shadow attribute holding the owner id
pub const OWNER_ATTRIBUTE: &str = "owner";
/// Shadow attribute holding the serialized [`CorrelationState`]
pub const STATE_ATTRIBUTE: &str = "correlation_state";
pub const CORRELATED_AT_ATTRIBUTE: &str = "correlated_at";

const BOOKKEEPING_ATTRIBUTES: [&str; 4] = [
    SITUATION_ATTRIBUTE,
    OWNER_ATTRIBUTE,
    STATE_ATTRIBUTE,
    CORRELATED_AT_ATTRIBUTE,
];

/// How re-processing treats a shadow already linked to an owner
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingStrength {
    /// Keep an existing link or recorded case decision; the shadow is skipped
    #[default]
    Weak,
    /// Correlate again and overwrite the link
    Strong,
}

/// Correlates the shadow each change refers to and records the outcome on it
pub struct CorrelationProcessor {
    service: CorrelationService,
    shadows: Arc<dyn ObjectStore>,
    shadow_type: String,
    context: CorrelationContext,
    strength: MappingStrength,
}

impl CorrelationProcessor {
    pub fn new(
        service: CorrelationService,
        shadows: Arc<dyn ObjectStore>,
        shadow_type: impl Into<String>,
        context: CorrelationContext,
    ) -> Self {
        Self {
            service,
            shadows,
            shadow_type: shadow_type.into(),
            context,
            strength: MappingStrength::default(),
        }
    }

    pub fn with_mapping_strength(mut self, strength: MappingStrength) -> Self {
        self.strength = strength;
        self
    }

    async fn correlate_change(&self, change: &ChangeRecord) -> Result<ItemOutcome, CorrelationError> {
        if change.kind == ChangeKind::Delete {
            return Ok(ItemOutcome::Skipped(format!(
                "subject '{}' deleted at its source",
                change.subject_id
            )));
        }

        let shadow = self.shadows.get(&self.shadow_type, &change.subject_id).await?;
        let mut state = correlation_state(&shadow)?;
        match self.strength {
            MappingStrength::Weak if linked_owner(&shadow).is_some() => {
                return Ok(ItemOutcome::Skipped(format!(
                    "subject '{}' already linked",
                    change.subject_id
                )));
            }
            MappingStrength::Weak if state.decision.is_some() => {
                return Ok(ItemOutcome::Skipped(format!(
                    "subject '{}' already decided",
                    change.subject_id
                )));
            }
            MappingStrength::Weak => {}
            MappingStrength::Strong => state.decision = None,
        }

        let mut subject = subject_of(&shadow);
        for (name, value) in &change.attributes {
            subject.attributes.insert(name.clone(), value.clone());
        }
        let result = self
            .service
            .correlate(&subject, &self.context, &mut state)
            .await?;
        debug!(
            subject = %subject.id,
            situation = result.situation().as_str(),
            "Subject correlated"
        );

        self.record(&subject.id, &change.attributes, &result, &state).await?;
        Ok(ItemOutcome::Success)
    }

    /// Apply a human decision to the subject's open case and record it on
    /// the shadow
    ///
    /// A decision that resolved an identity reference re-runs correlation,
    /// which then short-circuits to the follow-on correlator, so the owner
    /// link and situation land on the shadow as well.
    #[instrument(skip(self), fields(shadow_type = %self.shadow_type))]
    pub async fn resolve_case(
        &self,
        subject_id: &str,
        outcome: &str,
    ) -> Result<CorrelationResult, CorrelationError> {
        let shadow = self.shadows.get(&self.shadow_type, subject_id).await?;
        let subject = subject_of(&shadow);
        let mut state = correlation_state(&shadow)?;

        let case = self
            .service
            .cases()
            .open_case(subject_id)
            .await?
            .ok_or_else(|| CorrelationError::not_found("correlation case", subject_id))?;
        let decision = CaseDecision::parse(outcome)?;
        let chosen = case.candidates.find(&decision).cloned().ok_or_else(|| {
            CorrelationError::schema(format!(
                "outcome '{outcome}' is not an option of case {}",
                case.id
            ))
        })?;

        self.service
            .resolve_case(&subject, &self.context, &mut state, outcome)
            .await?;

        let result = match chosen.owner {
            Some(owner) => CorrelationResult::ExistingOwner { owner },
            None if state.reference_id.is_some() => {
                self.service
                    .correlate(&subject, &self.context, &mut state)
                    .await?
            }
            None => CorrelationResult::NoOwner,
        };
        info!(
            subject = %subject.id,
            situation = result.situation().as_str(),
            "Case decision recorded"
        );

        self.record(&subject.id, &Map::new(), &result, &state).await?;
        Ok(result)
    }

    /// Write the change attributes and the correlation outcome to the shadow
    async fn record(
        &self,
        subject_id: &str,
        attributes: &Map<String, Value>,
        result: &CorrelationResult,
        state: &CorrelationState,
    ) -> Result<(), CorrelationError> {
        let mut deltas: Vec<ItemDelta> = attributes
            .iter()
            .map(|(name, value)| ItemDelta::replace(name.clone(), value.clone()))
            .collect();
        deltas.push(ItemDelta::replace(SITUATION_ATTRIBUTE, result.situation().as_str()));
        deltas.push(match result {
            CorrelationResult::ExistingOwner { owner } => {
                ItemDelta::replace(OWNER_ATTRIBUTE, owner.id.clone())
            }
            _ => ItemDelta::remove(OWNER_ATTRIBUTE),
        });
        deltas.push(if state.is_empty() {
            ItemDelta::remove(STATE_ATTRIBUTE)
        } else {
            let state = serde_json::to_value(state)
                .map_err(|e| CorrelationError::schema(e.to_string()))?;
            ItemDelta::replace(STATE_ATTRIBUTE, state)
        });
        deltas.push(ItemDelta::replace(CORRELATED_AT_ATTRIBUTE, Utc::now().to_rfc3339()));

        self.shadows
            .modify(&self.shadow_type, subject_id, deltas)
            .await?;
        Ok(())
    }
}

/// Owner id recorded on a shadow
pub fn linked_owner(shadow: &Record) -> Option<&str> {
    shadow.attribute_str(OWNER_ATTRIBUTE)
}

/// Correlation state recorded on a shadow
pub fn correlation_state(shadow: &Record) -> Result<CorrelationState, CorrelationError> {
    match shadow.attribute(STATE_ATTRIBUTE) {
        None | Some(Value::Null) => Ok(CorrelationState::default()),
        Some(value) => serde_json::from_value(value.clone()).map_err(|e| {
            CorrelationError::schema(format!("invalid correlation state on '{}': {e}", shadow.id))
        }),
    }
}

/// Subject seen by correlators: the shadow without bookkeeping attributes
fn subject_of(shadow: &Record) -> Subject {
    let mut subject = Subject::from(shadow);
    for name in BOOKKEEPING_ATTRIBUTES {
        subject.attributes.remove(name);
    }
    subject
}

#[async_trait]
impl ItemProcessor<ChangeRecord> for CorrelationProcessor {
    async fn process(
        &self,
        request: &ItemProcessingRequest<ChangeRecord>,
        _ctx: &WorkerContext,
    ) -> Result<ItemOutcome, ItemError> {
        request.check_error_state()?;
        Ok(self.correlate_change(&request.item).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::case::InMemoryCaseManager;
    use crate::correlators::{FilterCorrelator, ItemCorrelation};
    use govrun_activity::processing::{ErrorState, PermanentErrorKind};
    use govrun_activity::{ActivityPath, InMemoryObjectStore};
    use tokio_util::sync::CancellationToken;

    struct Fixture {
        store: Arc<InMemoryObjectStore>,
        cases: Arc<InMemoryCaseManager>,
    }

    impl Fixture {
        fn new() -> Self {
            let store = Arc::new(InMemoryObjectStore::with_records([
                Record::new("user", "u1").with_attribute("email", "ann@example.com"),
                Record::new("user", "u2").with_attribute("family_name", "Doe"),
                Record::new("user", "u3").with_attribute("family_name", "Doe"),
                Record::new("shadow", "s1").with_attribute("mail", "ann@example.com"),
                Record::new("shadow", "s2").with_attribute("surname", "Doe"),
            ]));
            Self {
                store,
                cases: Arc::new(InMemoryCaseManager::new()),
            }
        }

        fn processor(&self, rules: Vec<ItemCorrelation>, strength: MappingStrength) -> CorrelationProcessor {
            let correlator = FilterCorrelator::new("filter", rules, self.store.clone()).unwrap();
            let service = CorrelationService::new(Arc::new(correlator), self.cases.clone());
            CorrelationProcessor::new(service, self.store.clone(), "shadow", CorrelationContext::new("user"))
                .with_mapping_strength(strength)
        }

        async fn shadow(&self, id: &str) -> Record {
            self.store.get("shadow", id).await.unwrap()
        }
    }

    fn worker() -> WorkerContext {
        WorkerContext {
            worker_index: 0,
            activity: ActivityPath::root(),
            cancellation: CancellationToken::new(),
        }
    }

    fn request(change: ChangeRecord) -> ItemProcessingRequest<ChangeRecord> {
        let error_state = change.error_state.clone();
        ItemProcessingRequest::new(1, change, ActivityPath::root()).with_error_state(error_state)
    }

    #[tokio::test]
    async fn test_links_owner_and_records_situation() {
        let fixture = Fixture::new();
        let processor = fixture.processor(vec![ItemCorrelation::attribute("mail", "email")], MappingStrength::Weak);

        let outcome = processor
            .process(&request(ChangeRecord::resync("s1")), &worker())
            .await
            .unwrap();
        assert_eq!(outcome, ItemOutcome::Success);

        let shadow = fixture.shadow("s1").await;
        assert_eq!(linked_owner(&shadow), Some("u1"));
        assert_eq!(shadow.attribute_str(SITUATION_ATTRIBUTE), Some("existing_owner"));
        assert!(shadow.attribute(STATE_ATTRIBUTE).is_none());
    }

    #[tokio::test]
    async fn test_weak_mapping_skips_linked_shadow() {
        let fixture = Fixture::new();
        let rules = vec![ItemCorrelation::attribute("mail", "email")];
        let weak = fixture.processor(rules.clone(), MappingStrength::Weak);
        weak.process(&request(ChangeRecord::resync("s1")), &worker()).await.unwrap();

        let again = weak
            .process(&request(ChangeRecord::resync("s1")), &worker())
            .await
            .unwrap();
        assert!(matches!(again, ItemOutcome::Skipped(_)));

        let strong = fixture.processor(rules, MappingStrength::Strong);
        let change = ChangeRecord::new("t2", "s1", ChangeKind::Modify).with_attribute("mail", "other@example.com");
        let outcome = strong.process(&request(change), &worker()).await.unwrap();
        assert_eq!(outcome, ItemOutcome::Success);

        let shadow = fixture.shadow("s1").await;
        assert_eq!(linked_owner(&shadow), None);
        assert_eq!(shadow.attribute_str("mail"), Some("other@example.com"));
        assert_eq!(shadow.attribute_str(SITUATION_ATTRIBUTE), Some("no_owner"));
    }

    #[tokio::test]
    async fn test_uncertain_opens_case() {
        let fixture = Fixture::new();
        let processor = fixture.processor(
            vec![ItemCorrelation::attribute("surname", "family_name")],
            MappingStrength::Weak,
        );
        processor.process(&request(ChangeRecord::resync("s2")), &worker()).await.unwrap();
        processor.process(&request(ChangeRecord::resync("s2")), &worker()).await.unwrap();

        assert_eq!(fixture.cases.open_case_count(), 1);
        let shadow = fixture.shadow("s2").await;
        assert_eq!(shadow.attribute_str(SITUATION_ATTRIBUTE), Some("uncertain"));
    }

    #[tokio::test]
    async fn test_resolve_case_links_chosen_owner() {
        let fixture = Fixture::new();
        let processor = fixture.processor(
            vec![ItemCorrelation::attribute("surname", "family_name")],
            MappingStrength::Weak,
        );
        processor.process(&request(ChangeRecord::resync("s2")), &worker()).await.unwrap();

        let result = processor.resolve_case("s2", "option:u3").await.unwrap();
        assert_eq!(result.owner().map(|o| o.id.as_str()), Some("u3"));
        assert_eq!(fixture.cases.open_case_count(), 0);

        let shadow = fixture.shadow("s2").await;
        assert_eq!(linked_owner(&shadow), Some("u3"));
        assert_eq!(shadow.attribute_str(SITUATION_ATTRIBUTE), Some("existing_owner"));
        assert_eq!(correlation_state(&shadow).unwrap().decision.as_deref(), Some("option:u3"));
        assert_eq!(subject_of(&shadow).attributes.get("surname"), Some(&Value::from("Doe")));
    }

    #[tokio::test]
    async fn test_none_of_the_above_survives_next_pass() {
        let fixture = Fixture::new();
        let rules = vec![ItemCorrelation::attribute("surname", "family_name")];
        let weak = fixture.processor(rules.clone(), MappingStrength::Weak);
        weak.process(&request(ChangeRecord::resync("s2")), &worker()).await.unwrap();

        let result = weak.resolve_case("s2", "none").await.unwrap();
        assert_eq!(result, CorrelationResult::NoOwner);

        let again = weak
            .process(&request(ChangeRecord::resync("s2")), &worker())
            .await
            .unwrap();
        assert!(matches!(again, ItemOutcome::Skipped(_)));
        assert_eq!(fixture.cases.open_case_count(), 0);
        let shadow = fixture.shadow("s2").await;
        assert_eq!(shadow.attribute_str(SITUATION_ATTRIBUTE), Some("no_owner"));

        // strong mapping discards the decision and asks again
        let strong = fixture.processor(rules, MappingStrength::Strong);
        strong.process(&request(ChangeRecord::resync("s2")), &worker()).await.unwrap();
        assert_eq!(fixture.cases.open_case_count(), 1);
        let shadow = fixture.shadow("s2").await;
        assert_eq!(correlation_state(&shadow).unwrap(), CorrelationState::default());
    }

    #[tokio::test]
    async fn test_resolve_case_rejects_unknown_case_and_option() {
        let fixture = Fixture::new();
        let processor = fixture.processor(
            vec![ItemCorrelation::attribute("surname", "family_name")],
            MappingStrength::Weak,
        );

        let err = processor.resolve_case("s2", "none").await.unwrap_err();
        assert!(matches!(err, CorrelationError::NotFound { .. }));

        processor.process(&request(ChangeRecord::resync("s2")), &worker()).await.unwrap();
        let err = processor.resolve_case("s2", "option:u1").await.unwrap_err();
        assert!(matches!(err, CorrelationError::Schema(_)));
        assert_eq!(fixture.cases.open_case_count(), 1);
        assert!(correlation_state(&fixture.shadow("s2").await).unwrap().decision.is_none());
    }

    #[tokio::test]
    async fn test_missing_shadow_and_error_states() {
        let fixture = Fixture::new();
        let processor = fixture.processor(vec![ItemCorrelation::attribute("mail", "email")], MappingStrength::Weak);

        let err = processor
            .process(&request(ChangeRecord::resync("gone")), &worker())
            .await
            .unwrap_err();
        assert!(err.is_not_found());

        let transient = ChangeRecord::resync("s1").with_error_state(ErrorState::Transient {
            message: "connector timeout".into(),
        });
        let err = processor.process(&request(transient), &worker()).await.unwrap_err();
        assert!(matches!(err, ItemError::Transient(_)));

        let schema = ChangeRecord::resync("s1").with_error_state(ErrorState::Permanent {
            kind: PermanentErrorKind::Schema,
            message: "bad attribute".into(),
        });
        assert!(processor.process(&request(schema), &worker()).await.is_err());

        let deleted = ChangeRecord::new("t3", "gone", ChangeKind::Delete);
        let outcome = processor.process(&request(deleted), &worker()).await.unwrap();
        assert!(matches!(outcome, ItemOutcome::Skipped(_)));
    }
}
