// govrun worker
//
// Runs one task to completion. Ctrl-C interrupts the run at the next safe
// point; starting the worker again with the same TASK_ID resumes it.

use std::process::ExitCode;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use govrun_activity::task::TaskRunStatus;
use govrun_activity::TaskRunError;
use govrun_worker::{load_definition, telemetry, WorkerConfig, WorkerRuntime};

/// Exit code for failures that need a fix before the task can run again
const EXIT_PERMANENT: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let dotenv = dotenvy::dotenv();

    let config = match WorkerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            telemetry::init_tracing(None);
            error!("Invalid configuration: {:#}", e);
            return ExitCode::from(EXIT_PERMANENT);
        }
    };
    telemetry::init_tracing(config.log_level.as_deref());
    if let Ok(path) = dotenv {
        info!("Loaded .env from {:?}", path);
    }

    match run(config).await {
        Ok(TaskRunStatus::Finished) => ExitCode::SUCCESS,
        Ok(TaskRunStatus::Interrupted) => {
            info!("Task interrupted; run the worker again with the same TASK_ID to resume");
            ExitCode::SUCCESS
        }
        Err(e) => {
            let permanent = e
                .downcast_ref::<TaskRunError>()
                .is_some_and(TaskRunError::is_permanent);
            if permanent {
                error!("Task failed permanently: {:#}", e);
                ExitCode::from(EXIT_PERMANENT)
            } else {
                error!("Task failed: {:#}", e);
                ExitCode::FAILURE
            }
        }
    }
}

async fn run(config: WorkerConfig) -> Result<TaskRunStatus> {
    let definition = load_definition(&config.task_definition)?;
    let runtime = WorkerRuntime::from_config(config).await?;

    let cancellation = CancellationToken::new();
    let run = runtime.run(&definition, cancellation.clone());
    tokio::pin!(run);

    let result = tokio::select! {
        result = &mut run => result,
        _ = tokio::signal::ctrl_c() => {
            warn!("Received Ctrl-C, interrupting task");
            cancellation.cancel();
            run.await
        }
    };

    let result = result.context("Task run failed")?;
    info!(
        task_id = %result.task_id,
        status = ?result.status,
        root_status = %result.root.status,
        partial_failure = result.root.partial_failure,
        processed = result.root.statistics.processed,
        "Worker done"
    );
    Ok(result.status)
}
