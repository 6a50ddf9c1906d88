//! PostgreSQL implementation of WorkStateStore
//!
//! - One JSONB document per (task, activity path)
//! - Conditional updates on the `version` column for compare-and-swap writes

use async_trait::async_trait;
use serde_json::Value;
use sqlx::{PgPool, Row};
use tracing::{debug, error, instrument};
use uuid::Uuid;

use super::store::*;
use crate::definition::ActivityPath;

/// PostgreSQL implementation of [`WorkStateStore`]
///
/// Shared by every worker process of a multi-node task, so bucket claims
/// made through it are visible to all of them.
///
/// # Example
///
/// ```ignore
/// use govrun_activity::PostgresWorkStateStore;
/// use sqlx::PgPool;
///
/// let pool = PgPool::connect("postgres://localhost/govrun").await?;
/// let store = PostgresWorkStateStore::new(pool);
/// store.migrate().await?;
/// ```
#[derive(Clone)]
pub struct PostgresWorkStateStore {
    pool: PgPool,
}

impl PostgresWorkStateStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to `database_url` with a default pool
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPool::connect(database_url).await.map_err(|e| {
            error!("Failed to connect to work-state database: {}", e);
            StoreError::Database(e.to_string())
        })?;
        Ok(Self::new(pool))
    }

    /// Apply the bundled schema migrations
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to run work-state migrations: {}", e);
                StoreError::Database(e.to_string())
            })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl WorkStateStore for PostgresWorkStateStore {
    #[instrument(skip(self), fields(path = %path))]
    async fn get_or_init_work_state(
        &self,
        task_id: Uuid,
        path: &ActivityPath,
    ) -> Result<VersionedDocument, StoreError> {
        sqlx::query(
            r#"
            INSERT INTO govrun_activity_work_state (task_id, path)
            VALUES ($1, $2)
            ON CONFLICT (task_id, path) DO NOTHING
            "#,
        )
        .bind(task_id)
        .bind(path.key())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to initialise work state: {}", e);
            StoreError::Database(e.to_string())
        })?;

        let row = sqlx::query(
            r#"
            SELECT version, document
            FROM govrun_activity_work_state
            WHERE task_id = $1 AND path = $2
            "#,
        )
        .bind(task_id)
        .bind(path.key())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(VersionedDocument {
            version: row.get::<i64, _>("version") as u64,
            document: row.get::<Value, _>("document"),
        })
    }

    #[instrument(skip(self, document), fields(path = %path))]
    async fn save_work_state(
        &self,
        task_id: Uuid,
        path: &ActivityPath,
        document: Value,
        expected_version: u64,
    ) -> Result<u64, StoreError> {
        let updated = sqlx::query(
            r#"
            UPDATE govrun_activity_work_state
            SET document = $3, version = version + 1, updated_at = NOW()
            WHERE task_id = $1 AND path = $2 AND version = $4
            RETURNING version
            "#,
        )
        .bind(task_id)
        .bind(path.key())
        .bind(&document)
        .bind(expected_version as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to save work state: {}", e);
            StoreError::Database(e.to_string())
        })?;

        if let Some(row) = updated {
            return Ok(row.get::<i64, _>("version") as u64);
        }

        let actual = sqlx::query(
            "SELECT version FROM govrun_activity_work_state WHERE task_id = $1 AND path = $2",
        )
        .bind(task_id)
        .bind(path.key())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?
        .map(|row| row.get::<i64, _>("version") as u64)
        .unwrap_or(0);

        debug!(expected_version, actual, "Work state version conflict");
        Err(StoreError::ConcurrencyConflict {
            expected: expected_version,
            actual,
        })
    }

    #[instrument(skip(self))]
    async fn list_work_states(
        &self,
        task_id: Uuid,
    ) -> Result<Vec<(ActivityPath, VersionedDocument)>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT path, version, document
            FROM govrun_activity_work_state
            WHERE task_id = $1
            ORDER BY path
            "#,
        )
        .bind(task_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|row| {
                (
                    ActivityPath::parse(row.get::<&str, _>("path")),
                    VersionedDocument {
                        version: row.get::<i64, _>("version") as u64,
                        document: row.get::<Value, _>("document"),
                    },
                )
            })
            .collect())
    }

    #[instrument(skip(self))]
    async fn task_local_root(&self, task_id: Uuid) -> Result<Option<ActivityPath>, StoreError> {
        let row = sqlx::query("SELECT local_root FROM govrun_task_work_state WHERE task_id = $1")
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(row.map(|row| ActivityPath::parse(row.get::<&str, _>("local_root"))))
    }

    #[instrument(skip(self), fields(path = %path))]
    async fn set_task_local_root(
        &self,
        task_id: Uuid,
        path: &ActivityPath,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO govrun_task_work_state (task_id, local_root)
            VALUES ($1, $2)
            ON CONFLICT (task_id) DO UPDATE SET local_root = EXCLUDED.local_root, updated_at = NOW()
            "#,
        )
        .bind(task_id)
        .bind(path.key())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to record task local root: {}", e);
            StoreError::Database(e.to_string())
        })?;
        Ok(())
    }
}
