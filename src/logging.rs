use crate::config::AppConfig;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Install the global subscriber. Keep the guard alive for the process
/// lifetime or buffered file output is lost.
pub fn init_logging(config: &AppConfig) -> WorkerGuard {
    let file_appender = match config.rotation.as_str() {
        "hourly" => tracing_appender::rolling::hourly(&config.log_dir, &config.log_file),
        "daily" => tracing_appender::rolling::daily(&config.log_dir, &config.log_file),
        _ => tracing_appender::rolling::never(&config.log_dir, &config.log_file),
    };

    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // sqlx logs every statement at info
    let filter_str = format!("{},sqlx=warn", config.log_level);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter_str));

    let registry = tracing_subscriber::registry().with(filter);

    if config.use_json {
        let file_layer = fmt::layer()
            .json()
            .with_target(true)
            .with_writer(non_blocking)
            .with_ansi(false);
        registry.with(file_layer).init();
    } else {
        let file_layer = fmt::layer()
            .with_target(false)
            .with_writer(non_blocking)
            .with_ansi(false);
        let stdout_layer = fmt::layer().with_target(false).with_ansi(true);
        registry.with(file_layer).with(stdout_layer).init();
    }

    guard
}

/// Log the effective settings once at startup. Never logs secrets.
pub fn log_effective_config(config: &AppConfig, env: &str) {
    let backend = if config.postgres_url.is_some() {
        "postgres"
    } else {
        "memory"
    };
    tracing::info!(
        env,
        version = env!("GIT_HASH"),
        backend,
        "Starting fintrans"
    );
    tracing::info!(
        queue = %config.queue.name,
        max_attempts = config.queue.max_attempts,
        retry_delay_ms = config.queue.retry_delay_ms,
        visibility_timeout_ms = config.queue.visibility_timeout_ms,
        concurrency = config.worker.concurrency,
        call_timeout_ms = config.worker.call_timeout_ms,
        "Transfer pipeline settings"
    );
    tracing::info!(
        ttl_secs = config.cache.ttl_secs,
        max_memory_bytes = config.cache.max_memory_bytes,
        sweep_interval_secs = config.cache.sweep_interval_secs,
        session_ttl_secs = config.auth.session_ttl_secs,
        "Cache and session settings"
    );
}
