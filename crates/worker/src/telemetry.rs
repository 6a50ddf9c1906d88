//! Tracing initialisation

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "govrun=info";

/// Filter directive: `RUST_LOG`, then `LOG_LEVEL` for the govrun crates
pub fn log_filter(rust_log: Option<String>, log_level: Option<&str>) -> String {
    match (rust_log, log_level) {
        (Some(filter), _) if !filter.is_empty() => filter,
        (_, Some(level)) => format!(
            "govrun_worker={level},govrun_activity={level},govrun_correlation={level}"
        ),
        _ => DEFAULT_FILTER.to_string(),
    }
}

/// Install the global subscriber; call once at process start
pub fn init_tracing(log_level: Option<&str>) {
    let filter = log_filter(std::env::var("RUST_LOG").ok(), log_level);
    let filter = EnvFilter::try_new(&filter).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}
