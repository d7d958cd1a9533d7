//! PostgreSQL-backed queue (`transfer_queue` table)
//!
//! `receive` claims one row with `FOR UPDATE SKIP LOCKED` and pushes its
//! `visible_at` forward by the visibility timeout, so concurrent consumers
//! never claim the same row and a crashed consumer's row reappears. Each
//! claim bumps `attempts`; settlement matches on `(delivery_tag, attempts)`
//! so only the latest claim can settle the row.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::{debug, warn};

use super::{Delivery, QueueError, QueuedMessage, Receipt, TransferQueue};

pub struct PgQueue {
    pool: PgPool,
    name: String,
    retry_delay: Duration,
    visibility_timeout: Duration,
}

impl PgQueue {
    pub fn new(
        pool: PgPool,
        name: impl Into<String>,
        retry_delay: Duration,
        visibility_timeout: Duration,
    ) -> Self {
        Self {
            pool,
            name: name.into(),
            retry_delay,
            visibility_timeout,
        }
    }

    /// Messages parked on the dead-letter path
    pub async fn dead_letter_count(&self) -> Result<i64, QueueError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM transfer_queue WHERE queue_name = $1 AND dead_lettered",
        )
        .bind(&self.name)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }
}

#[async_trait]
impl TransferQueue for PgQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn publish(&self, message: &QueuedMessage) -> Result<(), QueueError> {
        let body = String::from_utf8(message.encode()?)
            .map_err(|e| QueueError::Codec(e.to_string()))?;
        sqlx::query(
            r#"
            INSERT INTO transfer_queue (queue_name, message_id, body, enqueued_at)
            VALUES ($1, $2, $3::jsonb, $4)
            "#,
        )
        .bind(&self.name)
        .bind(&message.message_id)
        .bind(body)
        .bind(message.enqueued_at)
        .execute(&self.pool)
        .await?;

        debug!(queue = %self.name, message_id = %message.message_id, "Published");
        Ok(())
    }

    async fn receive(&self) -> Result<Option<Delivery>, QueueError> {
        loop {
            let row = sqlx::query(
                r#"
                UPDATE transfer_queue
                SET attempts = attempts + 1,
                    visible_at = NOW() + make_interval(secs => $2)
                WHERE delivery_tag = (
                    SELECT delivery_tag FROM transfer_queue
                    WHERE queue_name = $1 AND NOT dead_lettered AND visible_at <= NOW()
                    ORDER BY delivery_tag
                    FOR UPDATE SKIP LOCKED
                    LIMIT 1
                )
                RETURNING delivery_tag, body::text AS body, attempts
                "#,
            )
            .bind(&self.name)
            .bind(self.visibility_timeout.as_secs_f64())
            .fetch_optional(&self.pool)
            .await?;

            let Some(row) = row else {
                return Ok(None);
            };
            let delivery_tag: i64 = row.try_get("delivery_tag")?;
            let body: String = row.try_get("body")?;
            let attempts: i32 = row.try_get("attempts")?;
            let attempt = u32::try_from(attempts)
                .map_err(|_| QueueError::Codec(format!("attempt count {}", attempts)))?;

            match QueuedMessage::decode(body.as_bytes()) {
                Ok(message) => {
                    return Ok(Some(Delivery {
                        message,
                        delivery_tag,
                        attempt,
                    }));
                }
                Err(e) => {
                    warn!(
                        queue = %self.name,
                        delivery_tag,
                        error = %e,
                        "Dead-lettering undecodable message"
                    );
                    let receipt = Receipt {
                        delivery_tag,
                        attempt,
                    };
                    self.dead_letter(receipt, &e.to_string()).await?;
                }
            }
        }
    }

    async fn ack(&self, receipt: Receipt) -> Result<(), QueueError> {
        let result = sqlx::query(
            "DELETE FROM transfer_queue WHERE delivery_tag = $1 AND attempts = $2 AND NOT dead_lettered",
        )
        .bind(receipt.delivery_tag)
        .bind(attempt_param(receipt)?)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(QueueError::UnknownDelivery(receipt));
        }
        Ok(())
    }

    async fn nack(&self, receipt: Receipt, reason: &str) -> Result<(), QueueError> {
        let result = sqlx::query(
            r#"
            UPDATE transfer_queue
            SET visible_at = NOW() + make_interval(secs => $3), last_error = $4
            WHERE delivery_tag = $1 AND attempts = $2 AND NOT dead_lettered
            "#,
        )
        .bind(receipt.delivery_tag)
        .bind(attempt_param(receipt)?)
        .bind(self.retry_delay.as_secs_f64())
        .bind(reason)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(QueueError::UnknownDelivery(receipt));
        }
        Ok(())
    }

    async fn dead_letter(&self, receipt: Receipt, reason: &str) -> Result<(), QueueError> {
        let result = sqlx::query(
            r#"
            UPDATE transfer_queue SET dead_lettered = TRUE, last_error = $3
            WHERE delivery_tag = $1 AND attempts = $2 AND NOT dead_lettered
            "#,
        )
        .bind(receipt.delivery_tag)
        .bind(attempt_param(receipt)?)
        .bind(reason)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(QueueError::UnknownDelivery(receipt));
        }
        Ok(())
    }
}

fn attempt_param(receipt: Receipt) -> Result<i32, QueueError> {
    i32::try_from(receipt.attempt).map_err(|_| QueueError::UnknownDelivery(receipt))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::IdempotencyKey;
    use crate::queue::TransferMessage;
    use rust_decimal_macros::dec;
    use sqlx::postgres::PgPoolOptions;

    async fn create_test_pool() -> Option<PgPool> {
        let database_url = std::env::var("DATABASE_URL").ok()?;
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .connect(&database_url)
            .await
            .ok()?;
        crate::db::schema::init_schema(&pool).await.ok()?;
        Some(pool)
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL database"]
    async fn test_pg_queue_lifecycle() {
        let Some(pool) = create_test_pool().await else {
            eprintln!("Skipping test - database not available");
            return;
        };
        // Unique name keeps runs independent
        let name = format!("test-{}", ulid::Ulid::new());
        let queue = PgQueue::new(pool, name, Duration::ZERO, Duration::from_secs(30));

        let message = QueuedMessage::new(TransferMessage {
            card_number: "1111".into(),
            amount: dec!(12.34),
            recipient_card_number: "2222".into(),
            idempotency_key: IdempotencyKey::parse("pg-queue").unwrap(),
            user_id: 1,
        });
        queue.publish(&message).await.unwrap();

        let delivery = queue.receive().await.unwrap().unwrap();
        assert_eq!(delivery.message, message);
        assert_eq!(delivery.attempt, 1);
        assert!(queue.receive().await.unwrap().is_none());

        queue.nack(delivery.receipt(), "retry").await.unwrap();
        let again = queue.receive().await.unwrap().unwrap();
        assert_eq!(again.attempt, 2);

        // The first claim's receipt no longer settles the row
        assert!(matches!(
            queue.ack(delivery.receipt()).await,
            Err(QueueError::UnknownDelivery(_))
        ));

        queue.dead_letter(again.receipt(), "gave up").await.unwrap();
        assert!(queue.receive().await.unwrap().is_none());
        assert_eq!(queue.dead_letter_count().await.unwrap(), 1);
    }
}
