//! Transfer error types
//!
//! Validation and business rejections are returned to the ingestion caller.
//! Infrastructure errors are transient: ingestion reports them as "not
//! accepted, try again", the worker turns them into a queue redelivery.

use std::time::Duration;

use thiserror::Error;

use crate::directory::DirectoryError;
use crate::ledger::LedgerError;
use crate::money::MoneyError;
use crate::queue::QueueError;

#[derive(Error, Debug, Clone)]
pub enum TransferError {
    // === Validation Errors ===
    #[error("User not authenticated")]
    Unauthorized,

    #[error("Sender and recipient card cannot be the same")]
    SameCard,

    #[error("Amount must be greater than zero")]
    InvalidAmount,

    #[error("Amount has more than {max} decimal places")]
    PrecisionOverflow { max: u32 },

    #[error("Amount exceeds the maximum allowed")]
    AmountTooLarge,

    #[error("Malformed amount: {0}")]
    InvalidFormat(String),

    #[error("Idempotency key must be 1-64 characters without whitespace")]
    InvalidIdempotencyKey,

    #[error("Idempotency key already used for a different transfer: {0}")]
    IdempotencyKeyConflict(String),

    // === Card Errors ===
    #[error("Card not found: {0}")]
    CardNotFound(String),

    #[error("Card does not belong to the caller")]
    CardNotOwned,

    #[error("Card is not available: {0}")]
    CardUnavailable(String),

    #[error("Insufficient funds")]
    InsufficientFunds,

    // === Lookup Errors ===
    #[error("Transaction not found: {0}")]
    TransactionNotFound(String),

    // === System Errors ===
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Balance invariant violated: {0}")]
    InvariantViolation(String),

    #[error("Internal system error: {0}")]
    SystemError(String),
}

impl TransferError {
    /// Get the error code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            TransferError::Unauthorized => "UNAUTHORIZED",
            TransferError::SameCard => "SAME_CARD",
            TransferError::InvalidAmount => "INVALID_AMOUNT",
            TransferError::PrecisionOverflow { .. } => "PRECISION_OVERFLOW",
            TransferError::AmountTooLarge => "AMOUNT_TOO_LARGE",
            TransferError::InvalidFormat(_) => "INVALID_FORMAT",
            TransferError::InvalidIdempotencyKey => "INVALID_IDEMPOTENCY_KEY",
            TransferError::IdempotencyKeyConflict(_) => "IDEMPOTENCY_KEY_CONFLICT",
            TransferError::CardNotFound(_) => "CARD_NOT_FOUND",
            TransferError::CardNotOwned => "CARD_NOT_OWNED",
            TransferError::CardUnavailable(_) => "CARD_UNAVAILABLE",
            TransferError::InsufficientFunds => "INSUFFICIENT_FUNDS",
            TransferError::TransactionNotFound(_) => "TRANSACTION_NOT_FOUND",
            TransferError::Timeout(_) => "TIMEOUT",
            TransferError::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            TransferError::InvariantViolation(_) => "INVARIANT_VIOLATION",
            TransferError::SystemError(_) => "SYSTEM_ERROR",
        }
    }

    /// Get HTTP status code suggestion
    pub fn http_status(&self) -> u16 {
        match self {
            TransferError::Unauthorized => 401,
            TransferError::CardNotOwned => 403,
            TransferError::SameCard
            | TransferError::InvalidAmount
            | TransferError::PrecisionOverflow { .. }
            | TransferError::AmountTooLarge
            | TransferError::InvalidFormat(_)
            | TransferError::InvalidIdempotencyKey => 400,
            TransferError::CardNotFound(_) | TransferError::TransactionNotFound(_) => 404,
            TransferError::IdempotencyKeyConflict(_) => 409,
            TransferError::CardUnavailable(_) | TransferError::InsufficientFunds => 422,
            TransferError::InvariantViolation(_) | TransferError::SystemError(_) => 500,
            TransferError::ServiceUnavailable(_) => 503,
            TransferError::Timeout(_) => 504,
        }
    }

    /// A later retry of the same call may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TransferError::Timeout(_) | TransferError::ServiceUnavailable(_)
        )
    }

    /// Requires operator attention; retrying will not help
    pub fn is_fatal(&self) -> bool {
        matches!(self, TransferError::InvariantViolation(_))
    }
}

impl From<MoneyError> for TransferError {
    fn from(e: MoneyError) -> Self {
        match e {
            MoneyError::PrecisionOverflow { max, .. } => TransferError::PrecisionOverflow { max },
            MoneyError::InvalidAmount => TransferError::InvalidAmount,
            MoneyError::Overflow => TransferError::AmountTooLarge,
            MoneyError::InvalidFormat(s) => TransferError::InvalidFormat(s),
        }
    }
}

impl From<DirectoryError> for TransferError {
    fn from(e: DirectoryError) -> Self {
        match e {
            DirectoryError::CardNotFound(n) => TransferError::CardNotFound(n),
            DirectoryError::Timeout(d) => TransferError::Timeout(d),
            DirectoryError::InvariantViolation(msg) => TransferError::InvariantViolation(msg),
            e if e.is_transient() => TransferError::ServiceUnavailable(e.to_string()),
            e => TransferError::SystemError(e.to_string()),
        }
    }
}

impl From<LedgerError> for TransferError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::Corrupted(msg) => TransferError::SystemError(msg),
            e => TransferError::ServiceUnavailable(e.to_string()),
        }
    }
}

impl From<QueueError> for TransferError {
    fn from(e: QueueError) -> Self {
        if e.is_transient() {
            TransferError::ServiceUnavailable(e.to_string())
        } else {
            TransferError::SystemError(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(TransferError::SameCard.code(), "SAME_CARD");
        assert_eq!(TransferError::InsufficientFunds.code(), "INSUFFICIENT_FUNDS");
        assert_eq!(TransferError::Unauthorized.code(), "UNAUTHORIZED");
    }

    #[test]
    fn test_http_status() {
        assert_eq!(TransferError::Unauthorized.http_status(), 401);
        assert_eq!(TransferError::CardNotOwned.http_status(), 403);
        assert_eq!(TransferError::InvalidAmount.http_status(), 400);
        assert_eq!(TransferError::CardNotFound("1".into()).http_status(), 404);
        assert_eq!(TransferError::InsufficientFunds.http_status(), 422);
        assert_eq!(
            TransferError::IdempotencyKeyConflict("k".into()).http_status(),
            409
        );
        assert_eq!(TransferError::ServiceUnavailable("q".into()).http_status(), 503);
    }

    #[test]
    fn test_directory_error_mapping() {
        let e: TransferError = DirectoryError::Timeout(Duration::from_secs(1)).into();
        assert!(e.is_transient());
        let e: TransferError = DirectoryError::Unavailable("down".into()).into();
        assert!(matches!(e, TransferError::ServiceUnavailable(_)));
        let e: TransferError = DirectoryError::InvariantViolation("neg".into()).into();
        assert!(e.is_fatal());
        let e: TransferError = DirectoryError::CardNotFound("1".into()).into();
        assert!(matches!(e, TransferError::CardNotFound(_)));
    }

    #[test]
    fn test_money_error_mapping() {
        let e: TransferError = MoneyError::PrecisionOverflow {
            provided: 3,
            max: 2,
        }
        .into();
        assert_eq!(e.code(), "PRECISION_OVERFLOW");
        assert_eq!(e.to_string(), "Amount has more than 2 decimal places");
    }

    #[test]
    fn test_display() {
        assert_eq!(TransferError::InsufficientFunds.to_string(), "Insufficient funds");
    }
}
