//! Durable transfer queue
//!
//! At-least-once delivery. A received message stays owned by the consumer
//! until it is acknowledged, negatively acknowledged (redelivered after a
//! delay) or dead-lettered. A delivery that is never settled becomes visible
//! again once its visibility timeout elapses. Settlement goes through the
//! [`Receipt`] of one delivery, so a consumer that outlived its visibility
//! timeout cannot settle the redelivery held by another.

pub mod error;
pub mod memory;
pub mod message;
pub mod postgres;

pub use error::QueueError;
pub use memory::{DeadLetter, MemoryQueue};
pub use message::{Delivery, QueuedMessage, Receipt, TransferMessage};
pub use postgres::PgQueue;

use async_trait::async_trait;

#[async_trait]
pub trait TransferQueue: Send + Sync {
    /// Queue name for logging
    fn name(&self) -> &str;

    async fn publish(&self, message: &QueuedMessage) -> Result<(), QueueError>;

    /// Next visible message, or None if nothing is ready
    async fn receive(&self) -> Result<Option<Delivery>, QueueError>;

    /// Settled: remove the message for good
    async fn ack(&self, receipt: Receipt) -> Result<(), QueueError>;

    /// Not settled: make the message visible again after the retry delay
    async fn nack(&self, receipt: Receipt, reason: &str) -> Result<(), QueueError>;

    /// Retry budget exhausted: park the message on the dead-letter path
    async fn dead_letter(&self, receipt: Receipt, reason: &str) -> Result<(), QueueError>;
}
