//! In-memory stores for tests and single-process runs

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use uuid::Uuid;

use super::store::*;
use crate::definition::ActivityPath;

/// In-memory implementation of [`WorkStateStore`]
///
/// Provides the same conditional-update semantics as the PostgreSQL store,
/// so concurrent bucket claiming behaves identically.
///
/// # Example
///
/// ```
/// use govrun_activity::InMemoryWorkStateStore;
///
/// let store = InMemoryWorkStateStore::new();
/// assert_eq!(store.document_count(), 0);
/// ```
pub struct InMemoryWorkStateStore {
    documents: RwLock<HashMap<Uuid, BTreeMap<String, VersionedDocument>>>,
    local_roots: RwLock<HashMap<Uuid, ActivityPath>>,
}

impl InMemoryWorkStateStore {
    pub fn new() -> Self {
        Self {
            documents: RwLock::new(HashMap::new()),
            local_roots: RwLock::new(HashMap::new()),
        }
    }

    /// Number of stored documents across all tasks
    pub fn document_count(&self) -> usize {
        self.documents.read().values().map(BTreeMap::len).sum()
    }

    /// Current document for a path, without initialising it
    pub fn document(&self, task_id: Uuid, path: &ActivityPath) -> Option<VersionedDocument> {
        self.documents
            .read()
            .get(&task_id)
            .and_then(|docs| docs.get(&path.key()))
            .cloned()
    }

    /// Clear all data (for testing)
    pub fn clear(&self) {
        self.documents.write().clear();
        self.local_roots.write().clear();
    }
}

impl Default for InMemoryWorkStateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkStateStore for InMemoryWorkStateStore {
    async fn get_or_init_work_state(
        &self,
        task_id: Uuid,
        path: &ActivityPath,
    ) -> Result<VersionedDocument, StoreError> {
        let mut documents = self.documents.write();
        let document = documents
            .entry(task_id)
            .or_default()
            .entry(path.key())
            .or_insert_with(|| VersionedDocument {
                version: 1,
                document: Value::Object(Default::default()),
            });
        Ok(document.clone())
    }

    async fn save_work_state(
        &self,
        task_id: Uuid,
        path: &ActivityPath,
        document: Value,
        expected_version: u64,
    ) -> Result<u64, StoreError> {
        let mut documents = self.documents.write();
        let task_documents = documents.entry(task_id).or_default();
        let key = path.key();

        let actual = task_documents.get(&key).map(|d| d.version).unwrap_or(0);
        if actual != expected_version {
            return Err(StoreError::ConcurrencyConflict {
                expected: expected_version,
                actual,
            });
        }

        let version = actual + 1;
        task_documents.insert(key, VersionedDocument { version, document });
        Ok(version)
    }

    async fn list_work_states(
        &self,
        task_id: Uuid,
    ) -> Result<Vec<(ActivityPath, VersionedDocument)>, StoreError> {
        Ok(self
            .documents
            .read()
            .get(&task_id)
            .map(|docs| {
                docs.iter()
                    .map(|(key, doc)| (ActivityPath::parse(key), doc.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn task_local_root(&self, task_id: Uuid) -> Result<Option<ActivityPath>, StoreError> {
        Ok(self.local_roots.read().get(&task_id).cloned())
    }

    async fn set_task_local_root(
        &self,
        task_id: Uuid,
        path: &ActivityPath,
    ) -> Result<(), StoreError> {
        self.local_roots.write().insert(task_id, path.clone());
        Ok(())
    }
}

/// In-memory implementation of [`ObjectStore`]
pub struct InMemoryObjectStore {
    records: RwLock<HashMap<String, BTreeMap<String, Record>>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Build a store pre-populated with records (versions are reset to 1)
    pub fn with_records(records: impl IntoIterator<Item = Record>) -> Self {
        let store = Self::new();
        {
            let mut all = store.records.write();
            for mut record in records {
                record.version = 1;
                all.entry(record.object_type.clone())
                    .or_default()
                    .insert(record.id.clone(), record);
            }
        }
        store
    }

    /// Number of records of a type
    pub fn count(&self, object_type: &str) -> usize {
        self.records
            .read()
            .get(object_type)
            .map(BTreeMap::len)
            .unwrap_or(0)
    }
}

impl Default for InMemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn get(&self, object_type: &str, id: &str) -> Result<Record, StoreError> {
        self.records
            .read()
            .get(object_type)
            .and_then(|records| records.get(id))
            .cloned()
            .ok_or_else(|| StoreError::not_found(object_type, id))
    }

    async fn add(&self, mut record: Record) -> Result<u64, StoreError> {
        let mut records = self.records.write();
        let of_type = records.entry(record.object_type.clone()).or_default();
        if of_type.contains_key(&record.id) {
            return Err(StoreError::AlreadyExists {
                object_type: record.object_type,
                id: record.id,
            });
        }
        record.version = 1;
        of_type.insert(record.id.clone(), record);
        Ok(1)
    }

    async fn modify(
        &self,
        object_type: &str,
        id: &str,
        deltas: Vec<ItemDelta>,
    ) -> Result<Record, StoreError> {
        let mut records = self.records.write();
        let record = records
            .get_mut(object_type)
            .and_then(|records| records.get_mut(id))
            .ok_or_else(|| StoreError::not_found(object_type, id))?;

        record.apply(&deltas);
        record.version += 1;
        Ok(record.clone())
    }

    async fn search(&self, object_type: &str, query: &Query) -> Result<Vec<Record>, StoreError> {
        Ok(self
            .records
            .read()
            .get(object_type)
            .map(|records| {
                records
                    .values()
                    .filter(|record| query.matches(record))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}
