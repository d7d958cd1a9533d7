//! fintrans - card-to-card transfer service
//!
//! ```text
//! HTTP ─▶ Gateway ─▶ TransferIngestion ─▶ TransferQueue ─▶ WorkerPool
//!            │              │ (cache-aside)                    │
//!            ▼              ▼                                  ▼
//!        AuthService   CardCache ◀── CardDirectory ◀── TransferWorker ─▶ Ledger
//! ```
//!
//! Backends are PostgreSQL when `postgres_url` is configured, in-memory
//! otherwise.

use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;

use fintrans::auth::AuthService;
use fintrans::cache::{CardCache, spawn_expiry_sweeper};
use fintrans::config::AppConfig;
use fintrans::db::Database;
use fintrans::directory::{CardDirectory, CardStore, MemoryCardStore, PgCardStore};
use fintrans::gateway::{self, AppState};
use fintrans::ledger::{MemoryLedger, PgLedger, TransactionLedger};
use fintrans::queue::{MemoryQueue, PgQueue, TransferQueue};
use fintrans::shutdown::ShutdownSignal;
use fintrans::transfer::{PoolConfig, TransferIngestion, TransferWorker, WorkerConfig, WorkerPool};

// ============================================================
// COMMAND LINE
// ============================================================

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

/// Get port override from command line (--port argument)
fn get_port_override() -> Option<u16> {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if args[i] == "--port" && i + 1 < args.len() {
            return args[i + 1].parse().ok();
        }
    }
    None
}

// ============================================================
// BACKENDS
// ============================================================

struct Backends {
    store: Arc<dyn CardStore>,
    ledger: Arc<dyn TransactionLedger>,
    queue: Arc<dyn TransferQueue>,
    db: Option<Arc<Database>>,
}

async fn build_backends(config: &AppConfig) -> anyhow::Result<Backends> {
    let queue_config = &config.queue;

    match &config.postgres_url {
        Some(url) => {
            let db = Database::connect(url, config.postgres_max_connections)
                .await
                .context("Failed to connect to PostgreSQL")?;
            db.init_schema()
                .await
                .context("Failed to initialize schema")?;
            let pool = db.pool().clone();
            Ok(Backends {
                store: Arc::new(PgCardStore::new(pool.clone())),
                ledger: Arc::new(PgLedger::new(pool.clone())),
                queue: Arc::new(PgQueue::new(
                    pool,
                    queue_config.name.clone(),
                    queue_config.retry_delay(),
                    queue_config.visibility_timeout(),
                )),
                db: Some(Arc::new(db)),
            })
        }
        None => {
            tracing::warn!("postgres_url not set, using in-memory backends (state is lost on exit)");
            let ledger = Arc::new(MemoryLedger::new());
            Ok(Backends {
                store: Arc::new(MemoryCardStore::new(ledger.clone())),
                ledger,
                queue: Arc::new(MemoryQueue::new(
                    queue_config.name.clone(),
                    queue_config.retry_delay(),
                    queue_config.visibility_timeout(),
                )),
                db: None,
            })
        }
    }
}

// ============================================================
// MAIN
// ============================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let app_config = AppConfig::load(&env)?;
    let _log_guard = fintrans::logging::init_logging(&app_config);
    fintrans::logging::log_effective_config(&app_config, &env);

    let shutdown = Arc::new(ShutdownSignal::new());
    let call_timeout = app_config.worker.call_timeout();
    let backends = build_backends(&app_config).await?;

    // Cache replica
    let cache = Arc::new(CardCache::new(app_config.cache.cache_config()));
    let directory = Arc::new(CardDirectory::new(
        backends.store.clone(),
        cache.clone(),
        call_timeout,
    ));
    if app_config.cache.replicate_on_start {
        match directory.replicate_to_cache().await {
            Ok(report) => tracing::info!(
                cached = report.cached,
                skipped = report.skipped,
                "Cache replica warmed"
            ),
            // The replica is advisory; serve cold
            Err(e) => tracing::warn!(error = %e, "Cache replication failed"),
        }
    }
    let sweeper = spawn_expiry_sweeper(
        cache.clone(),
        app_config.cache.sweep_interval(),
        shutdown.clone(),
    );

    // Transfer pipeline
    let worker = Arc::new(TransferWorker::new(
        directory.clone(),
        backends.ledger.clone(),
        backends.queue.clone(),
        WorkerConfig {
            max_attempts: app_config.queue.max_attempts,
            call_timeout,
        },
    ));
    let pool = WorkerPool::new(
        worker,
        backends.queue.clone(),
        PoolConfig {
            concurrency: app_config.worker.concurrency,
            poll_interval: app_config.queue.poll_interval(),
        },
        shutdown.clone(),
    )
    .start();

    let ingestion = Arc::new(TransferIngestion::new(
        directory.clone(),
        backends.queue.clone(),
        backends.ledger.clone(),
        call_timeout,
    ));

    // Auth
    let auth = Arc::new(AuthService::new(
        app_config.auth.jwt_secret.clone(),
        app_config.auth.session_ttl(),
    ));
    let session_sweeper = {
        let auth = auth.clone();
        let shutdown = shutdown.clone();
        let interval = app_config.auth.session_ttl().max(std::time::Duration::from_secs(60));
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        let purged = auth.purge_expired_sessions();
                        if purged > 0 {
                            tracing::debug!(purged, "Expired sessions dropped");
                        }
                    }
                    _ = shutdown.wait() => return,
                }
            }
        })
    };

    let mut state = AppState::new(auth, directory, ingestion);
    if let Some(db) = backends.db {
        state = state.with_database(db);
    }

    // Gateway
    let port = get_port_override().unwrap_or(app_config.gateway.port);
    let addr = format!("{}:{}", app_config.gateway.host, port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let signal = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for ctrl-c");
            return;
        }
        tracing::info!("Shutdown requested");
        signal.request_shutdown();
    });

    let served = gateway::run_server(listener, Arc::new(state), shutdown.clone()).await;

    // Drain in-flight deliveries before exit
    shutdown.request_shutdown();
    pool.join().await;
    let _ = sweeper.await;
    let _ = session_sweeper.await;
    tracing::info!("fintrans stopped");

    served.context("Gateway server error")
}
