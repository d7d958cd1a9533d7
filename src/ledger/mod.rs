//! Transaction Ledger
//!
//! Append-only store of settled transfer outcomes, keyed by idempotency key.
//! A key is written at most once; a second append for the same key returns
//! the record that is already there and changes nothing.
//!
//! Committed records are written by the card store inside the same atomic
//! boundary as the balance mutation. Rejections and terminal failures are
//! appended by the transfer worker.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod types;

pub use error::LedgerError;
pub use memory::MemoryLedger;
pub use postgres::PgLedger;
pub use types::{AppendResult, IdempotencyKey, TransactionRecord, TransferOutcome};

use async_trait::async_trait;

/// Ledger backend
#[async_trait]
pub trait TransactionLedger: Send + Sync {
    /// Backend name for logging
    fn name(&self) -> &'static str;

    /// Look up the settled outcome for an idempotency key
    async fn find(&self, key: &IdempotencyKey) -> Result<Option<TransactionRecord>, LedgerError>;

    /// Append a record unless one already exists for its key
    async fn append(&self, record: &TransactionRecord) -> Result<AppendResult, LedgerError>;

    /// Most recent records touching a card (as sender or recipient), newest first
    async fn list_for_card(
        &self,
        card_number: &str,
        limit: usize,
    ) -> Result<Vec<TransactionRecord>, LedgerError>;
}
