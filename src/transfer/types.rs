//! Transfer request and status types

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::ledger::{IdempotencyKey, TransactionRecord};

/// Transfer submitted to ingestion
#[derive(Debug, Clone, PartialEq)]
pub struct TransferRequest {
    /// Authenticated caller
    pub user_id: i64,
    pub sender_card_number: String,
    pub recipient_card_number: String,
    pub amount: Decimal,
    /// Caller-supplied key; derived from the content when absent
    pub idempotency_key: Option<String>,
}

impl TransferRequest {
    pub fn new(
        user_id: i64,
        sender_card_number: impl Into<String>,
        recipient_card_number: impl Into<String>,
        amount: Decimal,
    ) -> Self {
        Self {
            user_id,
            sender_card_number: sender_card_number.into(),
            recipient_card_number: recipient_card_number.into(),
            amount,
            idempotency_key: None,
        }
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

/// Ingestion accepted the request: it is durably queued, not yet applied
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Acceptance {
    pub idempotency_key: IdempotencyKey,
    pub message_id: String,
}

/// Settlement state observed through the status query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum TransferStatus {
    /// Queued or in flight, no ledger record yet
    Pending { idempotency_key: IdempotencyKey },
    Settled { record: TransactionRecord },
}

impl TransferStatus {
    pub fn is_settled(&self) -> bool {
        matches!(self, TransferStatus::Settled { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::TransferOutcome;
    use rust_decimal_macros::dec;

    #[test]
    fn test_status_json_shape() {
        let key = IdempotencyKey::parse("k1").unwrap();
        let pending = serde_json::to_value(TransferStatus::Pending {
            idempotency_key: key.clone(),
        })
        .unwrap();
        assert_eq!(pending["status"], "pending");
        assert_eq!(pending["idempotency_key"], "k1");

        let record = TransactionRecord::new(key, "1", "2", dec!(5), TransferOutcome::Committed);
        let settled = serde_json::to_value(TransferStatus::Settled { record }).unwrap();
        assert_eq!(settled["status"], "settled");
        assert_eq!(settled["record"]["outcome"], "COMMITTED");
    }
}
