//! Card storage abstraction
//!
//! `apply_transfer` is the only way a balance changes. Implementations must:
//! - serialize concurrent mutations per card (never one global lock)
//! - re-validate both cards under that serialization
//! - write the committed `TransactionRecord` in the same atomic unit as the
//!   two balance updates, and refuse to mutate if the key is already recorded
//! - leave no partial state if the call is cancelled or fails midway

use async_trait::async_trait;
use rust_decimal::Decimal;

use super::error::DirectoryError;
use super::models::Card;
use crate::ledger::{IdempotencyKey, TransactionRecord, TransferOutcome};

/// One balance movement to apply
#[derive(Debug, Clone)]
pub struct TransferCommand {
    pub idempotency_key: IdempotencyKey,
    pub sender_card_number: String,
    pub recipient_card_number: String,
    pub amount: Decimal,
}

impl TransferCommand {
    /// Record to persist when this command commits
    pub fn committed_record(&self) -> TransactionRecord {
        TransactionRecord::new(
            self.idempotency_key.clone(),
            &self.sender_card_number,
            &self.recipient_card_number,
            self.amount,
            TransferOutcome::Committed,
        )
    }
}

/// Result of `apply_transfer`
#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
    /// Both balances changed and the record was written
    Committed(TransactionRecord),
    /// Business rejection found under lock; nothing changed
    Rejected(TransferOutcome),
    /// The key was already in the ledger; nothing changed
    AlreadyRecorded(TransactionRecord),
}

/// Authoritative card storage
#[async_trait]
pub trait CardStore: Send + Sync {
    /// Backend name for logging
    fn name(&self) -> &'static str;

    async fn get_card(&self, card_number: &str) -> Result<Option<Card>, DirectoryError>;

    async fn list_cards(&self, user_id: i64) -> Result<Vec<Card>, DirectoryError>;

    /// Every card, ordered by id (used for cache replication)
    async fn all_cards(&self) -> Result<Vec<Card>, DirectoryError>;

    /// Insert a new card. `card_id` is assigned by the store.
    ///
    /// Fails with `DuplicateCardNumber` if the number is taken.
    async fn insert_card(&self, card: Card) -> Result<Card, DirectoryError>;

    /// Returns false if the card does not exist
    async fn set_availability(
        &self,
        card_number: &str,
        available: bool,
    ) -> Result<bool, DirectoryError>;

    async fn apply_transfer(
        &self,
        command: &TransferCommand,
    ) -> Result<ApplyOutcome, DirectoryError>;
}

/// Rules checked under lock, shared by all backends
pub(crate) fn check_transfer(
    sender: Option<&Card>,
    recipient: Option<&Card>,
    amount: Decimal,
) -> Result<(), TransferOutcome> {
    let (Some(sender), Some(recipient)) = (sender, recipient) else {
        return Err(TransferOutcome::CardNotFound);
    };
    if !sender.is_available() {
        return Err(TransferOutcome::SenderUnavailable);
    }
    if !recipient.is_available() {
        return Err(TransferOutcome::RecipientUnavailable);
    }
    if !sender.can_cover(amount) {
        return Err(TransferOutcome::InsufficientFunds);
    }
    Ok(())
}
