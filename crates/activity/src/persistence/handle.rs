//! Single-writer access to one activity's work state

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use super::state::ActivityState;
use super::store::{StoreError, WorkStateStore};
use crate::definition::ActivityPath;

/// Errors reading or writing an activity's work state
#[derive(Debug, thiserror::Error)]
pub enum WorkStateError {
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Persisted document does not describe a valid activity state
    #[error("corrupted work state at {path}: {reason}")]
    Corrupted { path: ActivityPath, reason: String },
}

/// Handle to the work-state document of one activity path
///
/// Writes through one handle are serialised. Every write is a
/// read-modify-conditional-write; on a version conflict with another
/// process the closure is applied again to the fresh document, up to
/// `max_conflict_retries` times.
pub struct WorkStateHandle {
    store: Arc<dyn WorkStateStore>,
    task_id: Uuid,
    path: ActivityPath,
    max_conflict_retries: u32,
    write_lock: Mutex<()>,
}

impl WorkStateHandle {
    pub fn new(store: Arc<dyn WorkStateStore>, task_id: Uuid, path: ActivityPath) -> Self {
        Self {
            store,
            task_id,
            path,
            max_conflict_retries: 16,
            write_lock: Mutex::new(()),
        }
    }

    pub fn with_max_conflict_retries(mut self, retries: u32) -> Self {
        self.max_conflict_retries = retries;
        self
    }

    pub fn path(&self) -> &ActivityPath {
        &self.path
    }

    pub fn task_id(&self) -> Uuid {
        self.task_id
    }

    /// Read the current state
    pub async fn load(&self) -> Result<ActivityState, WorkStateError> {
        let current = self
            .store
            .get_or_init_work_state(self.task_id, &self.path)
            .await?;
        self.decode(current.document)
    }

    /// Apply `f` and persist the result
    pub async fn update<R>(
        &self,
        mut f: impl FnMut(&mut ActivityState) -> R,
    ) -> Result<R, WorkStateError> {
        self.apply(|state| (f(state), true)).await
    }

    /// Apply `f`; persist only when it returns `Some`
    ///
    /// This is the compare-and-swap primitive: a `None` leaves the stored
    /// document untouched.
    pub async fn update_if<R>(
        &self,
        mut f: impl FnMut(&mut ActivityState) -> Option<R>,
    ) -> Result<Option<R>, WorkStateError> {
        self.apply(|state| {
            let result = f(state);
            let write = result.is_some();
            (result, write)
        })
        .await
    }

    async fn apply<R>(
        &self,
        mut f: impl FnMut(&mut ActivityState) -> (R, bool),
    ) -> Result<R, WorkStateError> {
        let _guard = self.write_lock.lock().await;
        let mut conflicts = 0;

        loop {
            let current = self
                .store
                .get_or_init_work_state(self.task_id, &self.path)
                .await?;
            let mut state = self.decode(current.document)?;

            let (result, write) = f(&mut state);
            if !write {
                return Ok(result);
            }

            state.updated_at = Some(Utc::now());
            let document = serde_json::to_value(&state)
                .map_err(|e| StoreError::Serialization(e.to_string()))?;

            match self
                .store
                .save_work_state(self.task_id, &self.path, document, current.version)
                .await
            {
                Ok(_) => return Ok(result),
                Err(StoreError::ConcurrencyConflict { expected, actual })
                    if conflicts < self.max_conflict_retries =>
                {
                    conflicts += 1;
                    debug!(
                        path = %self.path,
                        expected,
                        actual,
                        conflicts,
                        "Work state changed concurrently, reapplying"
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn decode(&self, document: serde_json::Value) -> Result<ActivityState, WorkStateError> {
        serde_json::from_value(document).map_err(|e| WorkStateError::Corrupted {
            path: self.path.clone(),
            reason: e.to_string(),
        })
    }
}
