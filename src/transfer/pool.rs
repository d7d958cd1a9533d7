//! Worker pool: N concurrent consumers of one queue
//!
//! Correctness never depends on a single consumer; two consumers that
//! receive the same message settle it once through the ledger.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::bounded;
use super::worker::TransferWorker;
use crate::queue::TransferQueue;
use crate::shutdown::ShutdownSignal;

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub concurrency: usize,
    /// Sleep between polls of an empty queue
    pub poll_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            poll_interval: Duration::from_millis(100),
        }
    }
}

pub struct WorkerPool {
    worker: Arc<TransferWorker>,
    queue: Arc<dyn TransferQueue>,
    config: PoolConfig,
    shutdown: Arc<ShutdownSignal>,
}

/// Running consumers
pub struct WorkerPoolHandle {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPoolHandle {
    /// Wait for every consumer to exit (after shutdown was requested)
    pub async fn join(self) {
        for result in join_all(self.handles).await {
            if let Err(e) = result {
                error!(error = %e, "Consumer task panicked");
            }
        }
    }
}

impl WorkerPool {
    pub fn new(
        worker: Arc<TransferWorker>,
        queue: Arc<dyn TransferQueue>,
        config: PoolConfig,
        shutdown: Arc<ShutdownSignal>,
    ) -> Self {
        Self {
            worker,
            queue,
            config,
            shutdown,
        }
    }

    pub fn start(self) -> WorkerPoolHandle {
        let consumers = self.config.concurrency.max(1);
        info!(
            consumers,
            queue = %self.queue.name(),
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "Starting transfer workers"
        );

        let handles = (0..consumers)
            .map(|consumer_id| {
                let worker = self.worker.clone();
                let queue = self.queue.clone();
                let shutdown = self.shutdown.clone();
                let poll_interval = self.config.poll_interval;
                tokio::spawn(async move {
                    consume(consumer_id, worker, queue, poll_interval, shutdown).await
                })
            })
            .collect();

        WorkerPoolHandle { handles }
    }
}

async fn consume(
    consumer_id: usize,
    worker: Arc<TransferWorker>,
    queue: Arc<dyn TransferQueue>,
    poll_interval: Duration,
    shutdown: Arc<ShutdownSignal>,
) {
    let call_timeout = worker.config().call_timeout;

    // A delivery in progress always finishes; shutdown is only checked
    // between deliveries.
    while !shutdown.is_shutdown_requested() {
        match bounded(call_timeout, queue.receive()).await {
            Ok(Some(delivery)) => {
                let report = worker.process(delivery).await;
                debug!(
                    consumer_id,
                    idempotency_key = %report.idempotency_key,
                    state = %report.final_state,
                    disposition = ?report.disposition,
                    "Delivery processed"
                );
            }
            Ok(None) => idle(poll_interval, &shutdown).await,
            Err(e) => {
                warn!(consumer_id, error = %e, "Receive failed");
                idle(poll_interval, &shutdown).await;
            }
        }
    }

    info!(consumer_id, "Transfer consumer stopped");
}

async fn idle(poll_interval: Duration, shutdown: &ShutdownSignal) {
    tokio::select! {
        _ = tokio::time::sleep(poll_interval) => {}
        _ = shutdown.wait() => {}
    }
}
