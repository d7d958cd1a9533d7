//! Card directory errors

use std::time::Duration;

use thiserror::Error;

use crate::ledger::LedgerError;

#[derive(Error, Debug, Clone)]
pub enum DirectoryError {
    #[error("Card not found: {0}")]
    CardNotFound(String),

    #[error("Card number already exists: {0}")]
    DuplicateCardNumber(String),

    #[error("Invalid card data: {0}")]
    InvalidCard(String),

    #[error("Directory call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Directory unavailable: {0}")]
    Unavailable(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// An attempted negative balance. Requires operator attention.
    #[error("Balance invariant violated: {0}")]
    InvariantViolation(String),
}

impl DirectoryError {
    pub fn code(&self) -> &'static str {
        match self {
            DirectoryError::CardNotFound(_) => "CARD_NOT_FOUND",
            DirectoryError::DuplicateCardNumber(_) => "DUPLICATE_CARD_NUMBER",
            DirectoryError::InvalidCard(_) => "INVALID_CARD",
            DirectoryError::Timeout(_) => "TIMEOUT",
            DirectoryError::Unavailable(_) => "SERVICE_UNAVAILABLE",
            DirectoryError::DatabaseError(_) => "DATABASE_ERROR",
            DirectoryError::Ledger(_) => "LEDGER_ERROR",
            DirectoryError::InvariantViolation(_) => "INVARIANT_VIOLATION",
        }
    }

    /// Infrastructure failures that a later retry may clear
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DirectoryError::Timeout(_)
                | DirectoryError::Unavailable(_)
                | DirectoryError::DatabaseError(_)
                | DirectoryError::Ledger(_)
        )
    }
}

impl From<sqlx::Error> for DirectoryError {
    fn from(e: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &e
            && db_err.constraint() == Some("cards_balance_check")
        {
            return DirectoryError::InvariantViolation(db_err.message().to_string());
        }
        DirectoryError::DatabaseError(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(DirectoryError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(DirectoryError::Unavailable("down".into()).is_transient());
        assert!(!DirectoryError::CardNotFound("1".into()).is_transient());
        assert!(!DirectoryError::InvariantViolation("neg".into()).is_transient());
    }

    #[test]
    fn test_codes() {
        assert_eq!(DirectoryError::CardNotFound("1".into()).code(), "CARD_NOT_FOUND");
        assert_eq!(
            DirectoryError::Timeout(Duration::from_millis(5)).code(),
            "TIMEOUT"
        );
    }
}
