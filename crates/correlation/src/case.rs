//! Correlation cases
//!
//! A case asks a human to pick the owner of a subject the correlators could
//! not decide. There is at most one open case per subject.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::CorrelationError;
use crate::model::{CandidateSet, CaseDecision, Subject};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseState {
    Open,
    Closed,
}

/// A manual correlation decision request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationCase {
    pub id: Uuid,
    pub subject_id: String,
    /// Options offered to the decider
    pub candidates: CandidateSet,
    pub state: CaseState,
    /// Encoded decision, once closed by one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,
}

impl CorrelationCase {
    fn open(subject_id: &str, candidates: &CandidateSet, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7(),
            subject_id: subject_id.to_string(),
            candidates: candidates.clone(),
            state: CaseState::Open,
            outcome: None,
            created_at: now,
            updated_at: now,
            closed_at: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.state == CaseState::Open
    }
}

/// Manual correlation case store
#[async_trait]
pub trait CaseManager: Send + Sync + 'static {
    /// Open a case for the subject or refresh the candidates of its open case
    ///
    /// Idempotent by subject id: never creates a second open case.
    async fn create_or_update_case(
        &self,
        subject: &Subject,
        candidates: &CandidateSet,
    ) -> Result<CorrelationCase, CorrelationError>;

    /// Close the subject's open case, if any; returns the closed case
    async fn close_case_if_exists(
        &self,
        subject: &Subject,
        decision: Option<&CaseDecision>,
    ) -> Result<Option<CorrelationCase>, CorrelationError>;

    async fn open_case(&self, subject_id: &str) -> Result<Option<CorrelationCase>, CorrelationError>;
}

/// In-memory [`CaseManager`]
///
/// Keeps the latest case of every subject; closed cases stay until the
/// subject becomes uncertain again.
#[derive(Debug, Default)]
pub struct InMemoryCaseManager {
    cases: DashMap<String, CorrelationCase>,
}

impl InMemoryCaseManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open_case_count(&self) -> usize {
        self.cases.iter().filter(|c| c.is_open()).count()
    }

    /// Latest case of the subject, open or closed
    pub fn latest_case(&self, subject_id: &str) -> Option<CorrelationCase> {
        self.cases.get(subject_id).map(|c| c.clone())
    }
}

#[async_trait]
impl CaseManager for InMemoryCaseManager {
    async fn create_or_update_case(
        &self,
        subject: &Subject,
        candidates: &CandidateSet,
    ) -> Result<CorrelationCase, CorrelationError> {
        let now = Utc::now();
        let case = match self.cases.entry(subject.id.clone()) {
            Entry::Vacant(vacant) => {
                let case = CorrelationCase::open(&subject.id, candidates, now);
                info!(case_id = %case.id, subject = %subject.id, "Opened correlation case");
                vacant.insert(case).clone()
            }
            Entry::Occupied(mut occupied) => {
                let case = occupied.get_mut();
                if case.is_open() {
                    case.candidates = candidates.clone();
                    case.updated_at = now;
                    debug!(case_id = %case.id, subject = %subject.id, "Updated open correlation case");
                } else {
                    *case = CorrelationCase::open(&subject.id, candidates, now);
                    info!(case_id = %case.id, subject = %subject.id, "Reopened correlation case");
                }
                case.clone()
            }
        };
        Ok(case)
    }

    async fn close_case_if_exists(
        &self,
        subject: &Subject,
        decision: Option<&CaseDecision>,
    ) -> Result<Option<CorrelationCase>, CorrelationError> {
        let Some(mut case) = self.cases.get_mut(&subject.id) else {
            return Ok(None);
        };
        if !case.is_open() {
            return Ok(None);
        }

        let now = Utc::now();
        case.state = CaseState::Closed;
        case.outcome = decision.map(CaseDecision::encode);
        case.updated_at = now;
        case.closed_at = Some(now);
        info!(case_id = %case.id, subject = %subject.id, outcome = ?case.outcome, "Closed correlation case");
        Ok(Some(case.clone()))
    }

    async fn open_case(&self, subject_id: &str) -> Result<Option<CorrelationCase>, CorrelationError> {
        Ok(self
            .cases
            .get(subject_id)
            .filter(|c| c.is_open())
            .map(|c| c.clone()))
    }
}
