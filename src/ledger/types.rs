//! Ledger record types

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Maximum accepted length of a caller-supplied idempotency key
pub const MAX_IDEMPOTENCY_KEY_LEN: usize = 64;

/// Deterministic identifier of one logical transfer
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Accept a caller-supplied key (non-empty, at most 64 chars, no whitespace)
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty()
            || raw.len() > MAX_IDEMPOTENCY_KEY_LEN
            || raw.chars().any(char::is_whitespace)
        {
            return None;
        }
        Some(Self(raw.to_string()))
    }

    /// Derive a key from the request content.
    ///
    /// Identical content always yields the same key, so a resubmitted
    /// request collapses onto the original transfer.
    pub fn derive(
        user_id: i64,
        sender_card_number: &str,
        recipient_card_number: &str,
        amount: Decimal,
    ) -> Self {
        let content = format!(
            "{}|{}|{}|{}",
            user_id,
            sender_card_number,
            recipient_card_number,
            amount.normalize()
        );
        Self(format!("{:x}", md5::compute(content.as_bytes())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Settled outcome of a transfer
///
/// IDs are stored as SMALLINT in PostgreSQL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(i16)]
pub enum TransferOutcome {
    Committed = 1,
    InsufficientFunds = -1,
    RecipientUnavailable = -2,
    SenderUnavailable = -3,
    CardNotFound = -4,
    SystemFailure = -10,
}

impl TransferOutcome {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(TransferOutcome::Committed),
            -1 => Some(TransferOutcome::InsufficientFunds),
            -2 => Some(TransferOutcome::RecipientUnavailable),
            -3 => Some(TransferOutcome::SenderUnavailable),
            -4 => Some(TransferOutcome::CardNotFound),
            -10 => Some(TransferOutcome::SystemFailure),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransferOutcome::Committed => "COMMITTED",
            TransferOutcome::InsufficientFunds => "INSUFFICIENT_FUNDS",
            TransferOutcome::RecipientUnavailable => "RECIPIENT_UNAVAILABLE",
            TransferOutcome::SenderUnavailable => "SENDER_UNAVAILABLE",
            TransferOutcome::CardNotFound => "CARD_NOT_FOUND",
            TransferOutcome::SystemFailure => "SYSTEM_FAILURE",
        }
    }

    #[inline]
    pub fn is_committed(&self) -> bool {
        matches!(self, TransferOutcome::Committed)
    }

    /// Business rejections: recorded once, never retried
    #[inline]
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            TransferOutcome::InsufficientFunds
                | TransferOutcome::RecipientUnavailable
                | TransferOutcome::SenderUnavailable
                | TransferOutcome::CardNotFound
        )
    }
}

impl fmt::Display for TransferOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<i16> for TransferOutcome {
    type Error = ();

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        TransferOutcome::from_id(value).ok_or(())
    }
}

/// Immutable ledger row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub idempotency_key: IdempotencyKey,
    pub sender_card_number: String,
    pub recipient_card_number: String,
    pub amount: Decimal,
    pub outcome: TransferOutcome,
    /// Diagnostic detail for failures
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub committed_at: DateTime<Utc>,
}

impl TransactionRecord {
    pub fn new(
        idempotency_key: IdempotencyKey,
        sender_card_number: impl Into<String>,
        recipient_card_number: impl Into<String>,
        amount: Decimal,
        outcome: TransferOutcome,
    ) -> Self {
        Self {
            idempotency_key,
            sender_card_number: sender_card_number.into(),
            recipient_card_number: recipient_card_number.into(),
            amount,
            outcome,
            detail: None,
            committed_at: Utc::now(),
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// True if this record settles a transfer with the same content. A key
    /// reused for a different transfer does not match.
    pub fn describes(
        &self,
        sender_card_number: &str,
        recipient_card_number: &str,
        amount: Decimal,
    ) -> bool {
        self.sender_card_number == sender_card_number
            && self.recipient_card_number == recipient_card_number
            && self.amount == amount
    }

    /// True if the card is either side of this transfer
    pub fn touches(&self, card_number: &str) -> bool {
        self.sender_card_number == card_number || self.recipient_card_number == card_number
    }
}

impl fmt::Display for TransactionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Transaction[{}] {} -> {} amount={} outcome={}",
            self.idempotency_key,
            self.sender_card_number,
            self.recipient_card_number,
            self.amount,
            self.outcome
        )
    }
}

/// Result of [`super::TransactionLedger::append`]
#[derive(Debug, Clone, PartialEq)]
pub enum AppendResult {
    Inserted,
    /// A record already existed for the key; it was left unchanged
    Existing(TransactionRecord),
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_outcome_id_roundtrip() {
        let outcomes = [
            TransferOutcome::Committed,
            TransferOutcome::InsufficientFunds,
            TransferOutcome::RecipientUnavailable,
            TransferOutcome::SenderUnavailable,
            TransferOutcome::CardNotFound,
            TransferOutcome::SystemFailure,
        ];
        for outcome in outcomes {
            assert_eq!(TransferOutcome::from_id(outcome.id()), Some(outcome));
        }
        assert!(TransferOutcome::from_id(99).is_none());
    }

    #[test]
    fn test_outcome_classes() {
        assert!(TransferOutcome::Committed.is_committed());
        assert!(TransferOutcome::InsufficientFunds.is_rejection());
        assert!(TransferOutcome::CardNotFound.is_rejection());
        assert!(!TransferOutcome::SystemFailure.is_rejection());
        assert!(!TransferOutcome::Committed.is_rejection());
    }

    #[test]
    fn test_derived_key_is_deterministic() {
        let a = IdempotencyKey::derive(1, "1111", "2222", dec!(40));
        let b = IdempotencyKey::derive(1, "1111", "2222", dec!(40.00));
        let c = IdempotencyKey::derive(1, "1111", "2222", dec!(41));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.as_str().len(), 32);
    }

    #[test]
    fn test_parse_caller_key() {
        assert_eq!(IdempotencyKey::parse(" order-1 ").unwrap().as_str(), "order-1");
        assert!(IdempotencyKey::parse("").is_none());
        assert!(IdempotencyKey::parse("has space").is_none());
        assert!(IdempotencyKey::parse(&"x".repeat(65)).is_none());
    }

    #[test]
    fn test_outcome_serde_name() {
        let json = serde_json::to_string(&TransferOutcome::InsufficientFunds).unwrap();
        assert_eq!(json, "\"INSUFFICIENT_FUNDS\"");
    }
}
