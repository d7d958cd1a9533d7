use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum LedgerError {
    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Ledger unavailable: {0}")]
    Unavailable(String),

    #[error("Corrupted ledger row: {0}")]
    Corrupted(String),
}

impl LedgerError {
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::DatabaseError(_) => "DATABASE_ERROR",
            LedgerError::Unavailable(_) => "LEDGER_UNAVAILABLE",
            LedgerError::Corrupted(_) => "LEDGER_CORRUPTED",
        }
    }
}

impl From<sqlx::Error> for LedgerError {
    fn from(e: sqlx::Error) -> Self {
        LedgerError::DatabaseError(e.to_string())
    }
}
