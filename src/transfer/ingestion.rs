//! Transfer ingestion
//!
//! Validates a request against cache-aside card lookups and publishes it to
//! the queue. Acceptance means "durably queued", never "applied"; the
//! balance check here is optimistic and the worker repeats it
//! authoritatively before any mutation.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::bounded;
use super::error::TransferError;
use super::types::{Acceptance, TransferRequest, TransferStatus};
use crate::directory::{Card, CardDirectory};
use crate::ledger::{IdempotencyKey, TransactionLedger};
use crate::money::validate_amount;
use crate::queue::{QueuedMessage, TransferMessage, TransferQueue};

pub struct TransferIngestion {
    directory: Arc<CardDirectory>,
    queue: Arc<dyn TransferQueue>,
    ledger: Arc<dyn TransactionLedger>,
    call_timeout: Duration,
}

impl TransferIngestion {
    pub fn new(
        directory: Arc<CardDirectory>,
        queue: Arc<dyn TransferQueue>,
        ledger: Arc<dyn TransactionLedger>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            directory,
            queue,
            ledger,
            call_timeout,
        }
    }

    /// Validate and enqueue.
    ///
    /// `Err` with a validation or business error is a rejection; a transient
    /// error means nothing was queued and the caller may retry.
    pub async fn submit(&self, request: TransferRequest) -> Result<Acceptance, TransferError> {
        let amount = validate_amount(request.amount)?;

        if request.sender_card_number == request.recipient_card_number {
            return Err(TransferError::SameCard);
        }

        let idempotency_key = match &request.idempotency_key {
            Some(raw) => IdempotencyKey::parse(raw).ok_or(TransferError::InvalidIdempotencyKey)?,
            None => IdempotencyKey::derive(
                request.user_id,
                &request.sender_card_number,
                &request.recipient_card_number,
                amount,
            ),
        };

        // A key already settled for different content is refused. Same
        // content is queued again; the worker settles it once.
        let settled = bounded(self.call_timeout, self.ledger.find(&idempotency_key)).await?;
        if let Some(existing) = settled {
            if !existing.describes(
                &request.sender_card_number,
                &request.recipient_card_number,
                amount,
            ) {
                warn!(
                    idempotency_key = %idempotency_key,
                    settled_amount = %existing.amount,
                    requested_amount = %amount,
                    "Idempotency key reused for a different transfer"
                );
                return Err(TransferError::IdempotencyKeyConflict(
                    idempotency_key.to_string(),
                ));
            }
        }

        let sender = self.resolve(&request.sender_card_number).await?;
        if sender.user_id != request.user_id {
            warn!(
                user_id = request.user_id,
                card_owner = sender.user_id,
                "Transfer from a card the caller does not own"
            );
            return Err(TransferError::CardNotOwned);
        }
        if !sender.is_available() {
            return Err(TransferError::CardUnavailable(sender.card_number));
        }

        // Unknown recipients are rejected here so nothing is queued for them
        self.resolve(&request.recipient_card_number).await?;

        if !sender.can_cover(amount) {
            debug!(
                card_number = %sender.card_number,
                balance = %sender.balance,
                amount = %amount,
                "Pre-check: insufficient funds"
            );
            return Err(TransferError::InsufficientFunds);
        }

        let message = QueuedMessage::new(TransferMessage {
            card_number: request.sender_card_number,
            amount,
            recipient_card_number: request.recipient_card_number,
            idempotency_key: idempotency_key.clone(),
            user_id: request.user_id,
        });
        bounded(self.call_timeout, self.queue.publish(&message)).await?;

        info!(
            idempotency_key = %idempotency_key,
            message_id = %message.message_id,
            queue = %self.queue.name(),
            "Transfer accepted"
        );
        Ok(Acceptance {
            idempotency_key,
            message_id: message.message_id,
        })
    }

    /// Settlement status for a key
    pub async fn status(&self, raw_key: &str) -> Result<TransferStatus, TransferError> {
        let idempotency_key =
            IdempotencyKey::parse(raw_key).ok_or(TransferError::InvalidIdempotencyKey)?;
        let record = bounded(self.call_timeout, self.ledger.find(&idempotency_key)).await?;
        Ok(match record {
            Some(record) => TransferStatus::Settled { record },
            None => TransferStatus::Pending { idempotency_key },
        })
    }

    /// Cache-aside lookup (the directory applies its own timeout)
    async fn resolve(&self, card_number: &str) -> Result<Card, TransferError> {
        self.directory
            .lookup_cached(card_number)
            .await?
            .ok_or_else(|| TransferError::CardNotFound(card_number.to_string()))
    }
}
