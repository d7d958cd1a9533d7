//! Asynchronous transfer pipeline
//!
//! ```text
//! client → TransferIngestion (validate, cache-aside lookup) → TransferQueue
//!        → WorkerPool → TransferWorker (authoritative read, atomic apply)
//!        → TransactionLedger
//! ```
//!
//! # Safety Invariants
//!
//! 1. **Authoritative re-check**: the worker reads both cards from the
//!    directory before mutating; the cache never authorizes a debit.
//! 2. **Exactly-once effect**: one ledger record per idempotency key, written
//!    atomically with the balance change, so redelivery cannot double-apply.
//! 3. **Timeouts are failures, not rejections**: an elapsed call leaves the
//!    message for redelivery.

pub mod error;
pub mod ingestion;
pub mod pool;
pub mod state;
pub mod types;
pub mod worker;

use std::future::Future;
use std::time::Duration;

pub use error::TransferError;
pub use ingestion::TransferIngestion;
pub use pool::{PoolConfig, WorkerPool, WorkerPoolHandle};
pub use state::WorkerState;
pub use types::{Acceptance, TransferRequest, TransferStatus};
pub use worker::{Disposition, ProcessReport, TransferWorker, WorkerConfig};

/// Run a downstream call under a timeout; elapsed maps to `Timeout`
pub(crate) async fn bounded<T, E, F>(limit: Duration, fut: F) -> Result<T, TransferError>
where
    F: Future<Output = Result<T, E>>,
    E: Into<TransferError>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result.map_err(Into::into),
        Err(_) => Err(TransferError::Timeout(limit)),
    }
}
