//! Queue message schema
//!
//! The body is JSON:
//! `{"card_number", "amount", "recipient_card_number", "idempotency_key", "user_id"}`.
//! Amounts travel as decimal strings so no precision is lost.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::QueueError;
use crate::ledger::IdempotencyKey;

/// Transfer payload, immutable once enqueued
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferMessage {
    /// Sender card
    pub card_number: String,
    pub amount: Decimal,
    pub recipient_card_number: String,
    pub idempotency_key: IdempotencyKey,
    pub user_id: i64,
}

/// Delivery envelope. A redelivery carries the same envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedMessage {
    pub message_id: String,
    pub enqueued_at: DateTime<Utc>,
    pub body: TransferMessage,
}

impl QueuedMessage {
    pub fn new(body: TransferMessage) -> Self {
        Self {
            message_id: ulid::Ulid::new().to_string(),
            enqueued_at: Utc::now(),
            body,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, QueueError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, QueueError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// One delivery of a message to a consumer
#[derive(Debug, Clone)]
pub struct Delivery {
    pub message: QueuedMessage,
    /// Identifies the message on the queue
    pub delivery_tag: i64,
    /// 1 on first delivery
    pub attempt: u32,
}

impl Delivery {
    /// Handle for ack / nack / dead_letter
    pub fn receipt(&self) -> Receipt {
        Receipt {
            delivery_tag: self.delivery_tag,
            attempt: self.attempt,
        }
    }
}

/// Settles one particular delivery. Once a message is handed out again
/// after its visibility timeout, receipts from earlier deliveries no longer
/// settle it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Receipt {
    pub delivery_tag: i64,
    pub attempt: u32,
}

impl fmt::Display for Receipt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.delivery_tag, self.attempt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn body() -> TransferMessage {
        TransferMessage {
            card_number: "4000000000000001".into(),
            amount: dec!(40.50),
            recipient_card_number: "4000000000000002".into(),
            idempotency_key: IdempotencyKey::parse("order-1").unwrap(),
            user_id: 7,
        }
    }

    #[test]
    fn test_wire_field_names() {
        let message = QueuedMessage::new(body());
        let json: serde_json::Value = serde_json::from_slice(&message.encode().unwrap()).unwrap();

        let body = &json["body"];
        assert_eq!(body["card_number"], "4000000000000001");
        assert_eq!(body["recipient_card_number"], "4000000000000002");
        assert_eq!(body["amount"], "40.50");
        assert_eq!(body["idempotency_key"], "order-1");
        assert!(json["message_id"].as_str().unwrap().len() == 26);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            QueuedMessage::decode(b"{not json"),
            Err(QueueError::Codec(_))
        ));
    }
}
