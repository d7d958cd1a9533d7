//! Transfer worker
//!
//! Processes one delivery through the FSM in [`super::state`]:
//!
//! 1. A ledger record already exists for the key: acknowledge, nothing else.
//! 2. Read both cards from the directory (never the cache) and check them.
//! 3. Apply the transfer atomically; the directory writes the committed
//!    record in the same unit.
//! 4. Business rejections are recorded and acknowledged.
//! 5. Infrastructure failures are negatively acknowledged for redelivery,
//!    and dead-lettered with a `SystemFailure` record once the retry budget
//!    is spent.
//!
//! A key already settled for a different sender, recipient or amount is a
//! conflict. The delivery is dead-lettered and the settled record is left
//! untouched.
//!
//! Every downstream call carries a timeout. The worker never reports errors
//! to a caller; everything is encoded in the ledger and the queue disposition.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::bounded;
use super::error::TransferError;
use super::state::WorkerState;
use crate::directory::store::check_transfer;
use crate::directory::{ApplyOutcome, CardDirectory, TransferCommand};
use crate::ledger::{
    AppendResult, IdempotencyKey, TransactionLedger, TransactionRecord, TransferOutcome,
};
use crate::queue::{Delivery, TransferMessage, TransferQueue};

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Deliveries of one message before it is dead-lettered
    pub max_attempts: u32,
    /// Bound on every ledger and queue call
    pub call_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            call_timeout: Duration::from_secs(5),
        }
    }
}

/// What happened to the delivery on the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Acked,
    Requeued,
    DeadLettered,
    /// The queue call itself failed; the visibility timeout will redeliver
    Unsettled,
}

#[derive(Debug, Clone)]
pub struct ProcessReport {
    pub idempotency_key: IdempotencyKey,
    pub final_state: WorkerState,
    /// Ledger outcome, if one was settled on this delivery or an earlier one
    pub outcome: Option<TransferOutcome>,
    pub disposition: Disposition,
    /// States visited, starting with `Received`
    pub path: Vec<WorkerState>,
}

/// FSM cursor for one delivery
struct Progress<'a> {
    key: &'a IdempotencyKey,
    state: WorkerState,
    path: Vec<WorkerState>,
}

impl<'a> Progress<'a> {
    fn new(key: &'a IdempotencyKey) -> Self {
        Self {
            key,
            state: WorkerState::Received,
            path: vec![WorkerState::Received],
        }
    }

    fn advance(&mut self, next: WorkerState) {
        if !self.state.can_transition_to(next) {
            error!(
                idempotency_key = %self.key,
                from = %self.state,
                to = %next,
                "Illegal worker state transition"
            );
        }
        debug!(idempotency_key = %self.key, from = %self.state, to = %next, "Transition");
        self.state = next;
        self.path.push(next);
    }
}

pub struct TransferWorker {
    directory: Arc<CardDirectory>,
    ledger: Arc<dyn TransactionLedger>,
    queue: Arc<dyn TransferQueue>,
    config: WorkerConfig,
}

impl TransferWorker {
    pub fn new(
        directory: Arc<CardDirectory>,
        ledger: Arc<dyn TransactionLedger>,
        queue: Arc<dyn TransferQueue>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            directory,
            ledger,
            queue,
            config,
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub async fn process(&self, delivery: Delivery) -> ProcessReport {
        let body = &delivery.message.body;
        let key = &body.idempotency_key;
        let mut progress = Progress::new(key);

        let settled = self.settle(&delivery, &mut progress).await;

        let (outcome, disposition) = match settled {
            Ok(record) => {
                if record.outcome.is_committed() {
                    info!(
                        idempotency_key = %key,
                        attempt = delivery.attempt,
                        amount = %record.amount,
                        "Transfer committed"
                    );
                } else {
                    info!(
                        idempotency_key = %key,
                        attempt = delivery.attempt,
                        outcome = %record.outcome,
                        "Transfer settled without commit"
                    );
                }
                (Some(record.outcome), self.ack(&delivery).await)
            }
            Err(failure) => {
                progress.advance(WorkerState::Failed);
                self.handle_failure(&delivery, failure).await
            }
        };

        ProcessReport {
            idempotency_key: key.clone(),
            final_state: progress.state,
            outcome,
            disposition,
            path: progress.path,
        }
    }

    /// Drive the FSM until a record is settled or a failure stops it
    async fn settle(
        &self,
        delivery: &Delivery,
        progress: &mut Progress<'_>,
    ) -> Result<TransactionRecord, TransferError> {
        let body = &delivery.message.body;
        let key = &body.idempotency_key;

        if let Some(existing) = bounded(self.config.call_timeout, self.ledger.find(key)).await? {
            debug!(
                idempotency_key = %key,
                outcome = %existing.outcome,
                attempt = delivery.attempt,
                "Already settled, acknowledging redelivery"
            );
            let existing = same_transfer(body, existing)?;
            progress.advance(WorkerState::for_outcome(existing.outcome));
            return Ok(existing);
        }

        progress.advance(WorkerState::Resolving);
        let sender = self.directory.get_card(&body.card_number).await?;
        let recipient = self.directory.get_card(&body.recipient_card_number).await?;
        if let Err(outcome) = check_transfer(sender.as_ref(), recipient.as_ref(), body.amount) {
            return self.reject(delivery, outcome, progress).await;
        }

        progress.advance(WorkerState::Debiting);
        let command = TransferCommand {
            idempotency_key: key.clone(),
            sender_card_number: body.card_number.clone(),
            recipient_card_number: body.recipient_card_number.clone(),
            amount: body.amount,
        };
        match self.directory.apply_transfer(&command).await? {
            ApplyOutcome::Committed(record) => {
                progress.advance(WorkerState::Crediting);
                progress.advance(WorkerState::Committed);
                Ok(record)
            }
            ApplyOutcome::AlreadyRecorded(record) => {
                // A concurrent consumer settled the same key first
                let record = same_transfer(body, record)?;
                progress.advance(WorkerState::for_outcome(record.outcome));
                Ok(record)
            }
            ApplyOutcome::Rejected(outcome) => {
                // Card state changed between the read and the lock
                self.reject(delivery, outcome, progress).await
            }
        }
    }

    async fn reject(
        &self,
        delivery: &Delivery,
        outcome: TransferOutcome,
        progress: &mut Progress<'_>,
    ) -> Result<TransactionRecord, TransferError> {
        let body = &delivery.message.body;
        let record = TransactionRecord::new(
            body.idempotency_key.clone(),
            &body.card_number,
            &body.recipient_card_number,
            body.amount,
            outcome,
        );
        let settled = match bounded(self.config.call_timeout, self.ledger.append(&record)).await? {
            AppendResult::Inserted => record,
            AppendResult::Existing(existing) => same_transfer(body, existing)?,
        };
        progress.advance(WorkerState::for_outcome(settled.outcome));
        Ok(settled)
    }

    async fn handle_failure(
        &self,
        delivery: &Delivery,
        failure: TransferError,
    ) -> (Option<TransferOutcome>, Disposition) {
        let key = &delivery.message.body.idempotency_key;

        if matches!(failure, TransferError::IdempotencyKeyConflict(_)) {
            error!(
                idempotency_key = %key,
                amount = %delivery.message.body.amount,
                "Key already settled for a different transfer, dead-lettering"
            );
            return (None, self.dead_letter(delivery, &failure).await);
        }

        if failure.is_fatal() {
            error!(
                idempotency_key = %key,
                error = %failure,
                "Invariant violation, dead-lettering for operator attention"
            );
            return self.give_up(delivery, &failure).await;
        }

        if delivery.attempt >= self.config.max_attempts {
            error!(
                idempotency_key = %key,
                attempt = delivery.attempt,
                error = %failure,
                "Retry budget exhausted"
            );
            return self.give_up(delivery, &failure).await;
        }

        warn!(
            idempotency_key = %key,
            attempt = delivery.attempt,
            max_attempts = self.config.max_attempts,
            error = %failure,
            "Transfer failed, requeueing"
        );
        let disposition = match bounded(
            self.config.call_timeout,
            self.queue.nack(delivery.receipt(), &failure.to_string()),
        )
        .await
        {
            Ok(()) => Disposition::Requeued,
            Err(e) => {
                warn!(idempotency_key = %key, error = %e, "Nack failed");
                Disposition::Unsettled
            }
        };
        (None, disposition)
    }

    /// Record a terminal `SystemFailure` and dead-letter the message
    async fn give_up(
        &self,
        delivery: &Delivery,
        failure: &TransferError,
    ) -> (Option<TransferOutcome>, Disposition) {
        let body = &delivery.message.body;
        let key = &body.idempotency_key;
        let record = TransactionRecord::new(
            key.clone(),
            &body.card_number,
            &body.recipient_card_number,
            body.amount,
            TransferOutcome::SystemFailure,
        )
        .with_detail(format!("{} ({})", failure, failure.code()));

        let outcome = match bounded(self.config.call_timeout, self.ledger.append(&record)).await {
            Ok(AppendResult::Inserted) => Some(TransferOutcome::SystemFailure),
            Ok(AppendResult::Existing(existing)) => Some(existing.outcome),
            Err(e) => {
                error!(idempotency_key = %key, error = %e, "Failed to record SystemFailure");
                None
            }
        };

        (outcome, self.dead_letter(delivery, failure).await)
    }

    async fn dead_letter(&self, delivery: &Delivery, failure: &TransferError) -> Disposition {
        let key = &delivery.message.body.idempotency_key;
        match bounded(
            self.config.call_timeout,
            self.queue
                .dead_letter(delivery.receipt(), &failure.to_string()),
        )
        .await
        {
            Ok(()) => Disposition::DeadLettered,
            Err(e) => {
                error!(idempotency_key = %key, error = %e, "Dead-letter failed");
                Disposition::Unsettled
            }
        }
    }

    /// The outcome is already durable, so a failed ack only costs a
    /// redelivery that short-circuits on the ledger
    async fn ack(&self, delivery: &Delivery) -> Disposition {
        match bounded(self.config.call_timeout, self.queue.ack(delivery.receipt())).await {
            Ok(()) => Disposition::Acked,
            Err(e) => {
                warn!(
                    idempotency_key = %delivery.message.body.idempotency_key,
                    error = %e,
                    "Ack failed, message will be redelivered"
                );
                Disposition::Unsettled
            }
        }
    }
}

/// The settled record for this key, if it describes the same transfer
fn same_transfer(
    body: &TransferMessage,
    record: TransactionRecord,
) -> Result<TransactionRecord, TransferError> {
    if record.describes(&body.card_number, &body.recipient_card_number, body.amount) {
        Ok(record)
    } else {
        Err(TransferError::IdempotencyKeyConflict(
            body.idempotency_key.to_string(),
        ))
    }
}
