//! Composite correlator

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::correlator::Correlator;
use crate::error::CorrelationError;
use crate::model::{
    CaseDecision, Candidate, CorrelationContext, CorrelationResult, CorrelationState, OwnerRef,
    Subject,
};

/// How member results combine into one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CombinationPolicy {
    /// Members run in order; the first `ExistingOwner` wins. Without one,
    /// the candidates of all uncertain members are offered, else `NoOwner`.
    FirstDefinite,
    /// The first result other than `NoOwner` wins, uncertain or not
    FirstNonEmpty,
    /// Every member runs; a single owner agreed on by all definite members
    /// wins, disagreement or any uncertain member gives `Uncertain`
    Consensus,
}

/// Runs member correlators and combines their results by an explicit policy
pub struct CompositeCorrelator {
    name: String,
    members: Vec<Arc<dyn Correlator>>,
    policy: CombinationPolicy,
}

impl CompositeCorrelator {
    pub fn new(
        name: impl Into<String>,
        members: Vec<Arc<dyn Correlator>>,
        policy: CombinationPolicy,
    ) -> Result<Self, CorrelationError> {
        let name = name.into();
        if members.is_empty() {
            return Err(CorrelationError::configuration(format!(
                "composite correlator '{name}' has no members"
            )));
        }
        Ok(Self {
            name,
            members,
            policy,
        })
    }

    pub fn policy(&self) -> CombinationPolicy {
        self.policy
    }
}

/// Candidates collected from several results, without duplicate outcomes
#[derive(Default)]
struct CandidatePool {
    candidates: Vec<Candidate>,
}

impl CandidatePool {
    fn add(&mut self, candidate: Candidate) {
        let duplicate = if candidate.is_new_identity() {
            self.candidates
                .iter()
                .any(|c| c.is_new_identity() && c.attributes == candidate.attributes)
        } else {
            let outcome = candidate.outcome();
            self.candidates.iter().any(|c| c.outcome() == outcome)
        };
        if !duplicate {
            self.candidates.push(candidate);
        }
    }

    fn add_result(&mut self, result: CorrelationResult) {
        match result {
            CorrelationResult::Uncertain { candidates } => {
                for candidate in candidates.candidates() {
                    self.add(candidate.clone());
                }
            }
            CorrelationResult::ExistingOwner { owner } => self.add(Candidate::owner(owner)),
            CorrelationResult::NoOwner => {}
        }
    }

    fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    fn into_result(self) -> CorrelationResult {
        CorrelationResult::uncertain(self.candidates)
    }
}

#[async_trait]
impl Correlator for CompositeCorrelator {
    fn name(&self) -> &str {
        &self.name
    }

    async fn correlate(
        &self,
        subject: &Subject,
        ctx: &CorrelationContext,
        state: &mut CorrelationState,
    ) -> Result<CorrelationResult, CorrelationError> {
        let mut pool = CandidatePool::default();
        let mut owners: Vec<OwnerRef> = Vec::new();
        let mut uncertain = false;

        for member in &self.members {
            let result = member.correlate(subject, ctx, state).await?;
            debug!(
                correlator = %self.name,
                member = member.name(),
                subject = %subject.id,
                situation = result.situation().as_str(),
                "Member correlation done"
            );

            match (self.policy, result) {
                (_, CorrelationResult::NoOwner) => {}
                (CombinationPolicy::FirstDefinite, definite @ CorrelationResult::ExistingOwner { .. }) => {
                    return Ok(definite);
                }
                (CombinationPolicy::FirstNonEmpty, result) => return Ok(result),
                (CombinationPolicy::Consensus, CorrelationResult::ExistingOwner { owner }) => {
                    if !owners.contains(&owner) {
                        owners.push(owner);
                    }
                }
                (_, result) => {
                    uncertain = true;
                    pool.add_result(result);
                }
            }
        }

        if self.policy == CombinationPolicy::Consensus && !uncertain {
            match owners.len() {
                0 => return Ok(CorrelationResult::NoOwner),
                1 => return Ok(CorrelationResult::existing(owners.remove(0))),
                _ => {}
            }
        }
        for owner in owners {
            pool.add(Candidate::owner(owner));
        }

        if pool.is_empty() {
            Ok(CorrelationResult::NoOwner)
        } else {
            Ok(pool.into_result())
        }
    }

    async fn resolve(
        &self,
        subject: &Subject,
        ctx: &CorrelationContext,
        state: &mut CorrelationState,
        decision: &CaseDecision,
    ) -> Result<(), CorrelationError> {
        for member in &self.members {
            if member.handles_decision(state) {
                member.resolve(subject, ctx, state, decision).await?;
            }
        }
        Ok(())
    }

    fn handles_decision(&self, state: &CorrelationState) -> bool {
        self.members.iter().any(|m| m.handles_decision(state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Returns a fixed result
    struct Fixed(CorrelationResult);

    #[async_trait]
    impl Correlator for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn correlate(
            &self,
            _subject: &Subject,
            _ctx: &CorrelationContext,
            _state: &mut CorrelationState,
        ) -> Result<CorrelationResult, CorrelationError> {
            Ok(self.0.clone())
        }
    }

    fn owner(id: &str) -> CorrelationResult {
        CorrelationResult::existing(OwnerRef::new("user", id))
    }

    async fn combine(policy: CombinationPolicy, results: Vec<CorrelationResult>) -> CorrelationResult {
        let members = results
            .into_iter()
            .map(|r| Arc::new(Fixed(r)) as Arc<dyn Correlator>)
            .collect();
        CompositeCorrelator::new("composite", members, policy)
            .unwrap()
            .correlate(
                &Subject::new("s1"),
                &CorrelationContext::new("user"),
                &mut CorrelationState::default(),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_first_definite_skips_uncertain_members() {
        let uncertain = CorrelationResult::uncertain([Candidate::owner(OwnerRef::new("user", "x"))]);
        let result = combine(
            CombinationPolicy::FirstDefinite,
            vec![CorrelationResult::NoOwner, uncertain.clone(), owner("u2"), owner("u3")],
        )
        .await;
        assert_eq!(result, owner("u2"));

        let result = combine(CombinationPolicy::FirstDefinite, vec![uncertain.clone()]).await;
        assert_eq!(result, uncertain);
    }

    #[tokio::test]
    async fn test_first_non_empty_takes_uncertain() {
        let uncertain = CorrelationResult::uncertain([Candidate::reference("r1")]);
        let result = combine(
            CombinationPolicy::FirstNonEmpty,
            vec![CorrelationResult::NoOwner, uncertain.clone(), owner("u1")],
        )
        .await;
        assert_eq!(result, uncertain);
    }

    #[tokio::test]
    async fn test_consensus() {
        let agreed = combine(
            CombinationPolicy::Consensus,
            vec![owner("u1"), CorrelationResult::NoOwner, owner("u1")],
        )
        .await;
        assert_eq!(agreed, owner("u1"));

        let disputed = combine(CombinationPolicy::Consensus, vec![owner("u1"), owner("u2")]).await;
        let CorrelationResult::Uncertain { candidates } = disputed else {
            panic!("expected uncertain result");
        };
        assert_eq!(candidates.len(), 3);

        let nobody = combine(CombinationPolicy::Consensus, vec![CorrelationResult::NoOwner]).await;
        assert_eq!(nobody, CorrelationResult::NoOwner);
    }

    /// Reports decisions only for states carrying a match request, like an
    /// external matcher would
    #[derive(Default)]
    struct MatchRequestMember {
        resolved: parking_lot::Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Correlator for MatchRequestMember {
        fn name(&self) -> &str {
            "match_request"
        }

        async fn correlate(
            &self,
            _subject: &Subject,
            _ctx: &CorrelationContext,
            _state: &mut CorrelationState,
        ) -> Result<CorrelationResult, CorrelationError> {
            Ok(CorrelationResult::NoOwner)
        }

        async fn resolve(
            &self,
            _subject: &Subject,
            _ctx: &CorrelationContext,
            state: &mut CorrelationState,
            decision: &CaseDecision,
        ) -> Result<(), CorrelationError> {
            let request = state
                .match_request_id
                .take()
                .ok_or_else(|| CorrelationError::schema("no match request id recorded"))?;
            self.resolved.lock().push(format!("{request}={}", decision.encode()));
            Ok(())
        }

        fn handles_decision(&self, state: &CorrelationState) -> bool {
            state.match_request_id.is_some()
        }
    }

    #[tokio::test]
    async fn test_resolve_reaches_only_members_with_pending_requests() {
        let first = Arc::new(MatchRequestMember::default());
        let second = Arc::new(MatchRequestMember::default());
        let composite = CompositeCorrelator::new(
            "composite",
            vec![
                Arc::new(Fixed(owner("u1"))) as Arc<dyn Correlator>,
                first.clone(),
                second.clone(),
            ],
            CombinationPolicy::FirstDefinite,
        )
        .unwrap();
        let subject = Subject::new("s1");
        let ctx = CorrelationContext::new("user");
        let decision = CaseDecision::Candidate("u1".into());

        let mut state = CorrelationState::default();
        assert!(!composite.handles_decision(&state));
        composite.resolve(&subject, &ctx, &mut state, &decision).await.unwrap();
        assert!(first.resolved.lock().is_empty());

        state.match_request_id = Some("m-1".into());
        assert!(composite.handles_decision(&state));
        composite.resolve(&subject, &ctx, &mut state, &decision).await.unwrap();
        assert_eq!(*first.resolved.lock(), vec!["m-1=option:u1".to_string()]);
        assert!(second.resolved.lock().is_empty());
        assert_eq!(state.match_request_id, None);
    }

    #[tokio::test]
    async fn test_distinct_new_identities_survive_pooling() {
        let suggestion = |name: &str| {
            let mut attributes = serde_json::Map::new();
            attributes.insert("given_name".into(), name.into());
            CorrelationResult::uncertain([
                Candidate::reference("r1"),
                Candidate::none_of_the_above().with_attributes(attributes),
            ])
        };
        let result = combine(
            CombinationPolicy::FirstDefinite,
            vec![suggestion("Ann"), suggestion("Anne"), suggestion("Ann")],
        )
        .await;
        let CorrelationResult::Uncertain { candidates } = result else {
            panic!("expected uncertain result");
        };
        let outcomes: Vec<String> = candidates.candidates().iter().map(Candidate::outcome).collect();
        assert_eq!(outcomes, vec!["option:r1", "none", "none:1"]);
    }

    #[test]
    fn test_policy_has_no_default() {
        let missing: Result<CombinationPolicy, _> = serde_json::from_str("null");
        assert!(missing.is_err());
        let parsed: CombinationPolicy = serde_json::from_str("\"first_definite\"").unwrap();
        assert_eq!(parsed, CombinationPolicy::FirstDefinite);
    }
}
