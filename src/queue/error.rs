use thiserror::Error;

use super::Receipt;

#[derive(Error, Debug, Clone)]
pub enum QueueError {
    #[error("Queue unavailable: {0}")]
    Unavailable(String),

    #[error("Malformed message: {0}")]
    Codec(String),

    /// Already settled, or handed out again to another consumer
    #[error("Unknown delivery: {0}")]
    UnknownDelivery(Receipt),

    #[error("Database error: {0}")]
    DatabaseError(String),
}

impl QueueError {
    pub fn code(&self) -> &'static str {
        match self {
            QueueError::Unavailable(_) => "QUEUE_UNAVAILABLE",
            QueueError::Codec(_) => "MALFORMED_MESSAGE",
            QueueError::UnknownDelivery(_) => "UNKNOWN_DELIVERY",
            QueueError::DatabaseError(_) => "DATABASE_ERROR",
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            QueueError::Unavailable(_) | QueueError::DatabaseError(_)
        )
    }
}

impl From<sqlx::Error> for QueueError {
    fn from(e: sqlx::Error) -> Self {
        QueueError::DatabaseError(e.to_string())
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(e: serde_json::Error) -> Self {
        QueueError::Codec(e.to_string())
    }
}
