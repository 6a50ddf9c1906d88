//! Correlator behavior through the registry and the correlation service
//!
//! Run with: cargo test -p govrun-correlation --test correlator_scenarios_test

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use tokio_util::sync::CancellationToken;

use govrun_activity::persistence::{ObjectStore, Record};
use govrun_activity::processing::{ItemOutcome, ItemProcessingRequest, ItemProcessor, WorkerContext};
use govrun_activity::{ActivityPath, InMemoryObjectStore};
use govrun_correlation::match_service::{MatchRequest, MatchResponse, MatchService, PotentialMatch};
use govrun_correlation::prelude::*;
use govrun_correlation::processor::{correlation_state, linked_owner, SITUATION_ATTRIBUTE};

// ============================================
// Fixtures
// ============================================

fn owners() -> Arc<InMemoryObjectStore> {
    Arc::new(InMemoryObjectStore::with_records([
        Record::new("user", "u-emp")
            .with_attribute("employee_number", "E-100")
            .with_attribute("email", "ann.other@example.com"),
        Record::new("user", "u-mail").with_attribute("email", "ann@example.com"),
        Record::new("user", "u-ref").with_attribute("reference_id", "ref-7"),
    ]))
}

fn two_filters(policy: &str) -> CorrelatorConfiguration {
    serde_json::from_value(json!({
        "type": "composite",
        "name": "first-match",
        "policy": policy,
        "members": [
            {
                "type": "filter",
                "name": "by-employee-number",
                "rules": [{"source": {"from": "attribute", "name": "emp_no"}, "owner_attribute": "employee_number"}]
            },
            {
                "type": "filter",
                "name": "by-email",
                "rules": [{"source": {"from": "attribute", "name": "mail"}, "owner_attribute": "email"}]
            }
        ]
    }))
    .unwrap()
}

/// Match service with a fixed answer that counts calls
struct FixedMatchService {
    response: MatchResponse,
    calls: AtomicUsize,
}

impl FixedMatchService {
    fn new(response: MatchResponse) -> Arc<Self> {
        Arc::new(Self {
            response,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl MatchService for FixedMatchService {
    async fn execute_match(&self, _request: &MatchRequest) -> Result<MatchResponse, CorrelationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.response.clone())
    }

    async fn resolve(
        &self,
        _request: &MatchRequest,
        _match_request_id: &str,
        reference_id: Option<&str>,
    ) -> Result<Option<String>, CorrelationError> {
        Ok(reference_id.map(str::to_string))
    }
}

fn id_match_config() -> CorrelatorConfiguration {
    serde_json::from_value(json!({
        "type": "id_match",
        "sor_label": "hr",
        "follow_on": [{
            "type": "filter",
            "rules": [{"source": {"from": "reference_id"}, "owner_attribute": "reference_id"}]
        }]
    }))
    .unwrap()
}

// ============================================
// Scenario B: first-definite composite of two filters
// ============================================

#[test_log::test(tokio::test)]
async fn test_composite_first_definite_takes_second_rule() {
    let registry = CorrelatorRegistry::new(owners());
    let correlator = registry.instantiate(&two_filters("first_definite")).unwrap();

    let subject = Subject::new("s1")
        .with_attribute("emp_no", "E-999")
        .with_attribute("mail", "ann@example.com");
    let result = correlator
        .correlate(&subject, &CorrelationContext::new("user"), &mut CorrelationState::default())
        .await
        .unwrap();

    assert_eq!(result, CorrelationResult::existing(OwnerRef::new("user", "u-mail")));
}

#[test_log::test(tokio::test)]
async fn test_composite_first_definite_prefers_earlier_member() {
    let registry = CorrelatorRegistry::new(owners());
    let correlator = registry.instantiate(&two_filters("first_definite")).unwrap();

    // both members match, but different owners
    let subject = Subject::new("s1")
        .with_attribute("emp_no", "E-100")
        .with_attribute("mail", "ann@example.com");
    let result = correlator
        .correlate(&subject, &CorrelationContext::new("user"), &mut CorrelationState::default())
        .await
        .unwrap();
    assert_eq!(result.owner().map(|o| o.id.as_str()), Some("u-emp"));

    let consensus = registry.instantiate(&two_filters("consensus")).unwrap();
    let result = consensus
        .correlate(&subject, &CorrelationContext::new("user"), &mut CorrelationState::default())
        .await
        .unwrap();
    assert!(result.is_uncertain());
}

#[test_log::test(tokio::test)]
async fn test_correlation_is_deterministic() {
    let registry = CorrelatorRegistry::new(owners());
    let correlator = registry.instantiate(&two_filters("first_definite")).unwrap();
    let subject = Subject::new("s1").with_attribute("mail", "ann@example.com");
    let ctx = CorrelationContext::new("user");

    let first = correlator
        .correlate(&subject, &ctx, &mut CorrelationState::default())
        .await
        .unwrap();
    for _ in 0..5 {
        let again = correlator
            .correlate(&subject, &ctx, &mut CorrelationState::default())
            .await
            .unwrap();
        assert_eq!(again, first);
    }
}

// ============================================
// Scenario C: fuzzy external match
// ============================================

#[test_log::test(tokio::test)]
async fn test_fuzzy_match_offers_new_identity_option() {
    let service = FixedMatchService::new(MatchResponse::fuzzy(
        "mr-1",
        vec![
            PotentialMatch {
                reference_id: Some("ref-7".into()),
                confidence: Some(0.9),
                ..Default::default()
            },
            PotentialMatch {
                reference_id: Some("ref-8".into()),
                confidence: Some(0.6),
                ..Default::default()
            },
        ],
    ));
    let registry = CorrelatorRegistry::new(owners()).with_match_service(service.clone());
    let cases = Arc::new(InMemoryCaseManager::new());
    let correlation = CorrelationService::new(registry.instantiate(&id_match_config()).unwrap(), cases.clone());

    let subject = Subject::new("42").with_attribute("given_name", "Ann");
    let ctx = CorrelationContext::new("user");
    let mut state = CorrelationState::default();

    let result = correlation.correlate(&subject, &ctx, &mut state).await.unwrap();
    let CorrelationResult::Uncertain { candidates } = &result else {
        panic!("expected uncertain result, got {result:?}");
    };
    let outcomes: Vec<_> = candidates.candidates().iter().map(Candidate::outcome).collect();
    assert_eq!(outcomes, vec!["option:ref-7", "option:ref-8", "none"]);
    assert_eq!(state.match_request_id.as_deref(), Some("mr-1"));
    assert_eq!(cases.open_case_count(), 1);

    // a second pass while the case is open does not duplicate it
    let again = correlation.correlate(&subject, &ctx, &mut state).await.unwrap();
    assert!(again.is_uncertain());
    assert_eq!(cases.open_case_count(), 1);

    // the human picks ref-7; the follow-on correlator now finds the owner
    let decision = correlation
        .resolve_case(&subject, &ctx, &mut state, "option:ref-7")
        .await
        .unwrap();
    assert_eq!(decision, CaseDecision::Candidate("ref-7".into()));
    assert_eq!(state.reference_id.as_deref(), Some("ref-7"));
    assert_eq!(cases.open_case_count(), 0);

    let calls_before = service.calls.load(Ordering::SeqCst);
    let resolved = correlation.correlate(&subject, &ctx, &mut state).await.unwrap();
    assert_eq!(resolved.owner().map(|o| o.id.as_str()), Some("u-ref"));
    assert_eq!(service.calls.load(Ordering::SeqCst), calls_before);
}

#[test_log::test(tokio::test)]
async fn test_definite_match_uses_follow_on() {
    let service = FixedMatchService::new(MatchResponse::definite("ref-7"));
    let registry = CorrelatorRegistry::new(owners()).with_match_service(service);
    let correlator = registry.instantiate(&id_match_config()).unwrap();

    let mut state = CorrelationState::default();
    let result = correlator
        .correlate(&Subject::new("43"), &CorrelationContext::new("user"), &mut state)
        .await
        .unwrap();

    assert_eq!(result, CorrelationResult::existing(OwnerRef::new("user", "u-ref")));
    assert_eq!(state.reference_id.as_deref(), Some("ref-7"));
    assert!(state.match_request_id.is_none());
}

#[test_log::test(tokio::test)]
async fn test_id_match_follow_on_count_is_checked() {
    let registry = CorrelatorRegistry::new(owners())
        .with_match_service(FixedMatchService::new(MatchResponse::default()));
    let config: CorrelatorConfiguration = serde_json::from_value(json!({
        "type": "id_match",
        "sor_label": "hr",
        "follow_on": [{"type": "none"}, {"type": "none"}]
    }))
    .unwrap();

    let err = registry.instantiate(&config).err().unwrap();
    assert!(matches!(err, CorrelationError::Configuration(_)));
}

// ============================================
// Scenario D: a case decision kept on the shadow
// ============================================

async fn pass(processor: &CorrelationProcessor, subject_id: &str) -> ItemOutcome {
    let request = ItemProcessingRequest::new(1, ChangeRecord::resync(subject_id), ActivityPath::root());
    let worker = WorkerContext {
        worker_index: 0,
        activity: ActivityPath::root(),
        cancellation: CancellationToken::new(),
    };
    processor.process(&request, &worker).await.unwrap()
}

#[test_log::test(tokio::test)]
async fn test_resolved_case_short_circuits_next_pass() {
    let service = FixedMatchService::new(MatchResponse::fuzzy(
        "mr-1",
        vec![PotentialMatch {
            reference_id: Some("ref-7".into()),
            confidence: Some(0.8),
            ..Default::default()
        }],
    ));
    let objects = owners();
    objects
        .add(Record::new("shadow", "s1").with_attribute("given_name", "Ann"))
        .await
        .unwrap();
    let registry = CorrelatorRegistry::new(objects.clone()).with_match_service(service.clone());
    let cases = Arc::new(InMemoryCaseManager::new());
    let correlation = CorrelationService::new(registry.instantiate(&id_match_config()).unwrap(), cases.clone());
    let ctx = CorrelationContext::new("user");
    let weak = CorrelationProcessor::new(correlation.clone(), objects.clone(), "shadow", ctx.clone());

    assert_eq!(pass(&weak, "s1").await, ItemOutcome::Success);
    assert_eq!(cases.open_case_count(), 1);
    let shadow = objects.get("shadow", "s1").await.unwrap();
    assert_eq!(shadow.attribute_str(SITUATION_ATTRIBUTE), Some("uncertain"));

    let result = weak.resolve_case("s1", "option:ref-7").await.unwrap();
    assert_eq!(result.owner().map(|o| o.id.as_str()), Some("u-ref"));
    assert_eq!(cases.open_case_count(), 0);

    let shadow = objects.get("shadow", "s1").await.unwrap();
    assert_eq!(linked_owner(&shadow), Some("u-ref"));
    assert_eq!(shadow.attribute_str(SITUATION_ATTRIBUTE), Some("existing_owner"));
    let state = correlation_state(&shadow).unwrap();
    assert_eq!(state.reference_id.as_deref(), Some("ref-7"));
    assert_eq!(state.match_request_id, None);

    assert!(matches!(pass(&weak, "s1").await, ItemOutcome::Skipped(_)));

    // correlating again goes straight to the follow-on with the stored reference id
    let strong = CorrelationProcessor::new(correlation, objects.clone(), "shadow", ctx)
        .with_mapping_strength(MappingStrength::Strong);
    assert_eq!(pass(&strong, "s1").await, ItemOutcome::Success);

    assert_eq!(service.calls.load(Ordering::SeqCst), 1);
    assert_eq!(cases.open_case_count(), 0);
    let shadow = objects.get("shadow", "s1").await.unwrap();
    assert_eq!(linked_owner(&shadow), Some("u-ref"));
    assert_eq!(shadow.attribute_str(SITUATION_ATTRIBUTE), Some("existing_owner"));
}
