//! fintrans - card-to-card transfer service
//!
//! Transfers are accepted synchronously and settled asynchronously: ingestion
//! validates against a cache replica and enqueues, a worker pool applies each
//! transfer exactly once against the authoritative directory and records the
//! outcome in the transaction ledger.
//!
//! # Modules
//!
//! - [`directory`] - Card model, storage backends, transfer mutation
//! - [`cache`] - TTL and byte-budget bounded replica of the directory
//! - [`ledger`] - Append-only transaction records keyed by idempotency key
//! - [`queue`] - At-least-once transfer queue with a dead-letter path
//! - [`transfer`] - Ingestion, worker state machine and worker pool
//! - [`auth`] - Register / login / validate / logout
//! - [`gateway`] - HTTP surface
//! - [`money`] - Amount parsing and validation

// Ambient
pub mod config;
pub mod db;
pub mod logging;
pub mod shutdown;

// Domain
pub mod auth;
pub mod cache;
pub mod directory;
pub mod ledger;
pub mod money;
pub mod queue;
pub mod transfer;

// HTTP
pub mod gateway;

// Convenient re-exports at crate root
pub use cache::CardCache;
pub use directory::{Card, CardDirectory};
pub use ledger::{IdempotencyKey, TransactionRecord, TransferOutcome};
pub use shutdown::ShutdownSignal;
pub use transfer::{TransferIngestion, TransferRequest, TransferWorker};
