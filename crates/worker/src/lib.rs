//! govrun worker
//!
//! Assembles the activity handler registry and work-state store for one
//! worker process. The binary in `main.rs` reads a [`WorkerConfig`], builds a
//! [`WorkerRuntime`] and runs the configured task.

pub mod config;
pub mod mock;
pub mod telemetry;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use govrun_activity::persistence::{ObjectStore, Record};
use govrun_activity::{
    ActivityDefinition, ActivityHandlerRegistry, InMemoryObjectStore, InMemoryWorkStateStore,
    PostgresWorkStateStore, TaskRunResult, TaskRunner, WorkStateStore,
};
use govrun_correlation::case::{CaseManager, InMemoryCaseManager};
use govrun_correlation::source::{ChangeRecord, ChangeSource, InMemoryChangeSource};
use govrun_correlation::{CorrelationHandler, CorrelatorRegistry, HttpMatchService};

pub use config::WorkerConfig;
pub use mock::{MockIterativeHandler, MOCK_ITERATIVE_KIND};

/// Read a JSON document from disk
pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

/// Load the task's root activity definition
pub fn load_definition(path: &Path) -> Result<ActivityDefinition> {
    load_json(path).context("Invalid task definition")
}

fn load_records(path: Option<&Path>) -> Result<Vec<Record>> {
    match path {
        Some(path) => load_json(path),
        None => Ok(Vec::new()),
    }
}

/// Collaborators the built-in activity kinds work against
pub struct WorkerResources {
    pub objects: Arc<dyn ObjectStore>,
    pub changes: Arc<dyn ChangeSource>,
    pub cases: Arc<dyn CaseManager>,
}

impl WorkerResources {
    /// Load owners, subjects and changes from the files named in `config`
    pub fn load(config: &WorkerConfig) -> Result<Self> {
        let mut records = load_records(config.owners_file.as_deref())?;
        records.extend(load_records(config.subjects_file.as_deref())?);
        let changes: Vec<ChangeRecord> = match config.changes_file.as_deref() {
            Some(path) => load_json(path)?,
            None => Vec::new(),
        };
        info!(
            records = records.len(),
            changes = changes.len(),
            "Loaded worker resources"
        );

        Ok(Self {
            objects: Arc::new(InMemoryObjectStore::with_records(records)),
            changes: Arc::new(InMemoryChangeSource::new(changes)),
            cases: Arc::new(InMemoryCaseManager::new()),
        })
    }
}

/// Handler registry with every activity kind this worker can run
pub fn handler_registry(
    config: &WorkerConfig,
    resources: &WorkerResources,
) -> Result<ActivityHandlerRegistry> {
    let mut correlators = CorrelatorRegistry::new(resources.objects.clone());
    if let Some(match_config) = &config.match_service {
        info!(base_url = %match_config.base_url, "Using external match service");
        let service =
            HttpMatchService::new(match_config.clone()).context("Invalid match service configuration")?;
        correlators = correlators.with_match_service(Arc::new(service));
    }

    let correlation = CorrelationHandler::new(
        correlators,
        resources.cases.clone(),
        resources.objects.clone(),
    )
    .with_change_source(resources.changes.clone());

    Ok(ActivityHandlerRegistry::new()
        .with_handler(MockIterativeHandler)
        .with_handler(correlation))
}

/// Work-state store: PostgreSQL when `DATABASE_URL` is set, in-memory otherwise
pub async fn work_state_store(config: &WorkerConfig) -> Result<Arc<dyn WorkStateStore>> {
    match &config.database_url {
        Some(url) => {
            let store = PostgresWorkStateStore::connect(url)
                .await
                .context("Failed to connect to database")?;
            store.migrate().await.context("Failed to run migrations")?;
            info!("Using PostgreSQL work-state store");
            Ok(Arc::new(store))
        }
        None => {
            warn!("DATABASE_URL not set; work state will not survive this process");
            Ok(Arc::new(InMemoryWorkStateStore::new()))
        }
    }
}

/// Everything needed to run the configured task
pub struct WorkerRuntime {
    config: WorkerConfig,
    runner: TaskRunner,
}

impl WorkerRuntime {
    pub async fn from_config(config: WorkerConfig) -> Result<Self> {
        let resources = WorkerResources::load(&config)?;
        let registry = handler_registry(&config, &resources)?;
        let store = work_state_store(&config).await?;
        Ok(Self::new(config, TaskRunner::new(store, Arc::new(registry))))
    }

    pub fn new(config: WorkerConfig, runner: TaskRunner) -> Self {
        Self { config, runner }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Run the task until it finishes or `cancellation` fires
    pub async fn run(
        &self,
        definition: &ActivityDefinition,
        cancellation: CancellationToken,
    ) -> Result<TaskRunResult, govrun_activity::TaskRunError> {
        info!(
            task_id = %self.config.task_id,
            worker_id = %self.config.worker_id,
            root = %definition.identifier,
            "Running task"
        );
        self.runner
            .run(
                self.config.task_id,
                definition,
                &self.config.worker_id,
                cancellation,
            )
            .await
    }
}
