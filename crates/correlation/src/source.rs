//! Change streams feeding the correlation activity

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use govrun_activity::processing::ErrorState;

use crate::error::CorrelationError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Add,
    #[default]
    Modify,
    Delete,
}

/// One change of a resource object, as reported by its connector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    /// Position in the change stream; resuming after it skips this change
    pub token: String,
    /// Id of the shadow the change applies to
    pub subject_id: String,
    #[serde(default)]
    pub kind: ChangeKind,
    /// Attribute values carried by the change
    #[serde(default)]
    pub attributes: Map<String, Value>,
    /// Set when the connector could not fully fetch the change
    #[serde(default)]
    pub error_state: ErrorState,
}

impl ChangeRecord {
    pub fn new(token: impl Into<String>, subject_id: impl Into<String>, kind: ChangeKind) -> Self {
        Self {
            token: token.into(),
            subject_id: subject_id.into(),
            kind,
            attributes: Map::new(),
            error_state: ErrorState::Success,
        }
    }

    /// Re-correlation of a subject without a change (subject scans)
    pub fn resync(subject_id: impl Into<String>) -> Self {
        let subject_id = subject_id.into();
        Self::new(subject_id.clone(), subject_id, ChangeKind::Modify)
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn with_error_state(mut self, error_state: ErrorState) -> Self {
        self.error_state = error_state;
        self
    }
}

/// Ordered stream of changes, readable from a token
#[async_trait]
pub trait ChangeSource: Send + Sync + 'static {
    /// Up to `limit` changes following `after` (from the start when `None`)
    async fn fetch_changes(
        &self,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ChangeRecord>, CorrelationError>;
}

/// In-memory [`ChangeSource`]; changes are kept in append order
#[derive(Debug, Default)]
pub struct InMemoryChangeSource {
    changes: RwLock<Vec<ChangeRecord>>,
}

impl InMemoryChangeSource {
    pub fn new(changes: impl IntoIterator<Item = ChangeRecord>) -> Self {
        Self {
            changes: RwLock::new(changes.into_iter().collect()),
        }
    }

    pub fn push(&self, change: ChangeRecord) {
        self.changes.write().push(change);
    }

    pub fn len(&self) -> usize {
        self.changes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.read().is_empty()
    }
}

#[async_trait]
impl ChangeSource for InMemoryChangeSource {
    async fn fetch_changes(
        &self,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ChangeRecord>, CorrelationError> {
        let changes = self.changes.read();
        let start = match after {
            None => 0,
            Some(token) => {
                changes
                    .iter()
                    .position(|c| c.token == token)
                    .ok_or_else(|| CorrelationError::schema(format!("unknown change token '{token}'")))?
                    + 1
            }
        };
        Ok(changes.iter().skip(start).take(limit).cloned().collect())
    }
}
