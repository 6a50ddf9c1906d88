//! Store traits consumed by the execution framework

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::definition::ActivityPath;

/// Error type for store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Record not found
    #[error("{object_type} '{id}' not found")]
    ObjectNotFound { object_type: String, id: String },

    /// Record already exists
    #[error("{object_type} '{id}' already exists")]
    AlreadyExists { object_type: String, id: String },

    /// Concurrency conflict (conditional update failed)
    #[error("concurrency conflict: expected version {expected}, got {actual}")]
    ConcurrencyConflict { expected: u64, actual: u64 },

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    pub fn not_found(object_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::ObjectNotFound {
            object_type: object_type.into(),
            id: id.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ObjectNotFound { .. })
    }
}

/// A work-state document together with its version
///
/// Versions start at 1 for a freshly initialised document and grow by one
/// per successful save.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionedDocument {
    pub version: u64,
    pub document: Value,
}

/// Persistence of resumable work state, keyed by task and activity path
///
/// Every save is conditional on the version the caller read. This is the
/// compare-and-swap that bucket claiming and all other work-state writes
/// rely on across processes.
#[async_trait]
pub trait WorkStateStore: Send + Sync + 'static {
    /// Load the document for `path`, creating an empty one (`{}`, version 1) if absent
    async fn get_or_init_work_state(
        &self,
        task_id: Uuid,
        path: &ActivityPath,
    ) -> Result<VersionedDocument, StoreError>;

    /// Replace the document if its stored version is still `expected_version`
    ///
    /// Returns the new version, or [`StoreError::ConcurrencyConflict`].
    async fn save_work_state(
        &self,
        task_id: Uuid,
        path: &ActivityPath,
        document: Value,
        expected_version: u64,
    ) -> Result<u64, StoreError>;

    /// All documents of a task, ordered by path key
    async fn list_work_states(
        &self,
        task_id: Uuid,
    ) -> Result<Vec<(ActivityPath, VersionedDocument)>, StoreError>;

    /// Local root recorded for the task, if any
    async fn task_local_root(&self, task_id: Uuid) -> Result<Option<ActivityPath>, StoreError>;

    /// Record the subtree the task's worker is responsible for
    async fn set_task_local_root(
        &self,
        task_id: Uuid,
        path: &ActivityPath,
    ) -> Result<(), StoreError>;
}

/// A versioned record of the object store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub object_type: String,
    pub id: String,
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

impl Record {
    pub fn new(object_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            object_type: object_type.into(),
            id: id.into(),
            version: 0,
            attributes: Map::new(),
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    /// String value of an attribute, if it is a string
    pub fn attribute_str(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).and_then(Value::as_str)
    }

    /// Apply deltas in order
    pub fn apply(&mut self, deltas: &[ItemDelta]) {
        for delta in deltas {
            match delta {
                ItemDelta::Replace { attribute, value } => {
                    self.attributes.insert(attribute.clone(), value.clone());
                }
                ItemDelta::Remove { attribute } => {
                    self.attributes.remove(attribute);
                }
            }
        }
    }
}

/// Single attribute modification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ItemDelta {
    Replace { attribute: String, value: Value },
    Remove { attribute: String },
}

impl ItemDelta {
    pub fn replace(attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Replace {
            attribute: attribute.into(),
            value: value.into(),
        }
    }

    pub fn remove(attribute: impl Into<String>) -> Self {
        Self::Remove {
            attribute: attribute.into(),
        }
    }
}

/// Conjunction of attribute equality conditions
///
/// A condition on a multi-valued (array) attribute matches when any value
/// equals the expected one. An empty query matches every record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub conditions: Vec<(String, Value)>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push((attribute.into(), value.into()));
        self
    }

    pub fn matches(&self, record: &Record) -> bool {
        self.conditions.iter().all(|(attribute, expected)| {
            match record.attributes.get(attribute) {
                Some(Value::Array(values)) => values.contains(expected),
                Some(value) => value == expected,
                None => false,
            }
        })
    }
}

/// Generic versioned record store (owners, shadows, cases)
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    async fn get(&self, object_type: &str, id: &str) -> Result<Record, StoreError>;

    /// Insert a new record; returns the stored version
    async fn add(&self, record: Record) -> Result<u64, StoreError>;

    /// Apply deltas to an existing record; returns the updated record
    async fn modify(
        &self,
        object_type: &str,
        id: &str,
        deltas: Vec<ItemDelta>,
    ) -> Result<Record, StoreError>;

    /// Records of `object_type` matching `query`, ordered by id
    async fn search(&self, object_type: &str, query: &Query) -> Result<Vec<Record>, StoreError>;
}
