//! Worker configuration from the environment

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use uuid::Uuid;

use govrun_correlation::MatchServiceConfig;

/// Configuration of one worker process
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Identifies this worker in bucket delegations
    pub worker_id: String,
    /// Task to run; reuse the id to resume an interrupted task
    pub task_id: Uuid,
    /// JSON file with the root activity definition
    pub task_definition: PathBuf,
    /// PostgreSQL work-state store; in-memory when absent
    pub database_url: Option<String>,
    /// JSON array of change records for the correlation activity
    pub changes_file: Option<PathBuf>,
    /// JSON array of subject (shadow) records
    pub subjects_file: Option<PathBuf>,
    /// JSON array of owner records
    pub owners_file: Option<PathBuf>,
    pub match_service: Option<MatchServiceConfig>,
    pub log_level: Option<String>,
}

impl WorkerConfig {
    /// Read the configuration from environment variables
    ///
    /// - `WORKER_ID`: defaults to `worker-<uuid>`
    /// - `TASK_ID`: defaults to a new task
    /// - `TASK_DEFINITION`: required
    /// - `DATABASE_URL`, `CHANGES_FILE`, `SUBJECTS_FILE`, `OWNERS_FILE`
    /// - `MATCH_SERVICE_URL`, `MATCH_SERVICE_USERNAME`, `MATCH_SERVICE_PASSWORD`
    /// - `LOG_LEVEL`
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let task_id = match var("TASK_ID") {
            Some(id) => Uuid::parse_str(&id).with_context(|| format!("Invalid TASK_ID '{id}'"))?,
            None => Uuid::now_v7(),
        };
        let Some(task_definition) = var("TASK_DEFINITION") else {
            bail!("TASK_DEFINITION not set");
        };

        let match_service = var("MATCH_SERVICE_URL").map(|url| {
            let config = MatchServiceConfig::new(url);
            match (var("MATCH_SERVICE_USERNAME"), var("MATCH_SERVICE_PASSWORD")) {
                (Some(username), password) => {
                    config.with_credentials(username, password.unwrap_or_default())
                }
                (None, _) => config,
            }
        });

        Ok(Self {
            worker_id: var("WORKER_ID").unwrap_or_else(|| format!("worker-{}", Uuid::now_v7())),
            task_id,
            task_definition: PathBuf::from(task_definition),
            database_url: var("DATABASE_URL"),
            changes_file: var("CHANGES_FILE").map(PathBuf::from),
            subjects_file: var("SUBJECTS_FILE").map(PathBuf::from),
            owners_file: var("OWNERS_FILE").map(PathBuf::from),
            match_service,
            log_level: var("LOG_LEVEL"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<WorkerConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        WorkerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_minimal_configuration() {
        let config = config(&[("TASK_DEFINITION", "task.json")]).unwrap();
        assert!(config.worker_id.starts_with("worker-"));
        assert_eq!(config.task_definition, PathBuf::from("task.json"));
        assert!(config.database_url.is_none());
        assert!(config.match_service.is_none());
    }

    #[test]
    fn test_full_configuration() {
        let task_id = Uuid::now_v7().to_string();
        let config = config(&[
            ("TASK_DEFINITION", "task.json"),
            ("TASK_ID", &task_id),
            ("WORKER_ID", "w-1"),
            ("DATABASE_URL", "postgres://localhost/govrun"),
            ("CHANGES_FILE", "changes.json"),
            ("MATCH_SERVICE_URL", "http://match.local"),
            ("MATCH_SERVICE_USERNAME", "admin"),
            ("LOG_LEVEL", ""),
        ])
        .unwrap();

        assert_eq!(config.task_id.to_string(), task_id);
        assert_eq!(config.worker_id, "w-1");
        assert_eq!(config.changes_file, Some(PathBuf::from("changes.json")));
        let match_service = config.match_service.unwrap();
        assert_eq!(match_service.username.as_deref(), Some("admin"));
        assert_eq!(match_service.password.as_deref(), Some(""));
        assert!(config.log_level.is_none());
    }

    #[test]
    fn test_definition_is_required_and_task_id_validated() {
        assert!(config(&[]).is_err());
        assert!(config(&[("TASK_DEFINITION", "t.json"), ("TASK_ID", "nope")]).is_err());
    }
}
