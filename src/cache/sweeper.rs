//! Periodic expiry sweep

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::CardCache;
use crate::shutdown::ShutdownSignal;

/// Spawn a task that drops expired entries every `interval` until shutdown
pub fn spawn_expiry_sweeper(
    cache: Arc<CardCache>,
    interval: Duration,
    shutdown: Arc<ShutdownSignal>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let purged = cache.purge_expired();
                    if purged > 0 {
                        debug!(purged, remaining = cache.len(), "Cache sweep");
                    }
                }
                _ = shutdown.wait() => {
                    info!("Cache sweeper stopped");
                    return;
                }
            }
        }
    })
}
