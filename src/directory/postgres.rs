//! PostgreSQL card store
//!
//! A transfer runs in one database transaction:
//! lock both rows (`FOR UPDATE`, card-number order), re-check, update both
//! balances, insert the ledger row, commit. Dropping the transaction on any
//! error or cancellation rolls everything back.

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Row};
use tracing::{debug, error, warn};

use super::error::DirectoryError;
use super::models::{Card, CardType};
use super::store::{ApplyOutcome, CardStore, TransferCommand, check_transfer};
use crate::ledger::postgres::{fetch_record, insert_record};

const CARD_COLUMNS: &str = "card_id, user_id, username, card_number, card_type, \
                            expiry_date, availability, balance";

pub struct PgCardStore {
    pool: PgPool,
}

impl PgCardStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_card(row: &PgRow) -> Result<Card, DirectoryError> {
    let raw_type: String = row.try_get("card_type")?;
    let card_type = raw_type
        .parse::<CardType>()
        .map_err(DirectoryError::InvalidCard)?;
    let expiry_date: NaiveDate = row.try_get("expiry_date")?;
    let balance: Decimal = row.try_get("balance")?;

    Ok(Card {
        card_id: row.try_get("card_id")?,
        user_id: row.try_get("user_id")?,
        username: row.try_get("username")?,
        card_number: row.try_get("card_number")?,
        card_type,
        expiry_date,
        availability: row.try_get("availability")?,
        balance,
    })
}

async fn lock_card(
    conn: &mut PgConnection,
    card_number: &str,
) -> Result<Option<Card>, DirectoryError> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM cards WHERE card_number = $1 FOR UPDATE",
        CARD_COLUMNS
    ))
    .bind(card_number)
    .fetch_optional(conn)
    .await?;

    row.as_ref().map(row_to_card).transpose()
}

async fn add_to_balance(
    conn: &mut PgConnection,
    card_number: &str,
    delta: Decimal,
) -> Result<(), DirectoryError> {
    sqlx::query(
        r#"
        UPDATE cards
        SET balance = balance + $1, updated_at = NOW()
        WHERE card_number = $2
        "#,
    )
    .bind(delta)
    .bind(card_number)
    .execute(conn)
    .await?;
    Ok(())
}

#[async_trait]
impl CardStore for PgCardStore {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn get_card(&self, card_number: &str) -> Result<Option<Card>, DirectoryError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM cards WHERE card_number = $1",
            CARD_COLUMNS
        ))
        .bind(card_number)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_card).transpose()
    }

    async fn list_cards(&self, user_id: i64) -> Result<Vec<Card>, DirectoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM cards WHERE user_id = $1 ORDER BY card_id",
            CARD_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_card).collect()
    }

    async fn all_cards(&self) -> Result<Vec<Card>, DirectoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM cards ORDER BY card_id",
            CARD_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_card).collect()
    }

    async fn insert_card(&self, card: Card) -> Result<Card, DirectoryError> {
        let result = sqlx::query(
            r#"
            INSERT INTO cards
                (user_id, username, card_number, card_type, expiry_date, availability, balance)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING card_id
            "#,
        )
        .bind(card.user_id)
        .bind(&card.username)
        .bind(&card.card_number)
        .bind(card.card_type.as_str())
        .bind(card.expiry_date)
        .bind(card.availability)
        .bind(card.balance)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(row) => Ok(Card {
                card_id: row.try_get("card_id")?,
                ..card
            }),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(DirectoryError::DuplicateCardNumber(card.card_number))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn set_availability(
        &self,
        card_number: &str,
        available: bool,
    ) -> Result<bool, DirectoryError> {
        let result = sqlx::query(
            "UPDATE cards SET availability = $1, updated_at = NOW() WHERE card_number = $2",
        )
        .bind(available)
        .bind(card_number)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn apply_transfer(
        &self,
        command: &TransferCommand,
    ) -> Result<ApplyOutcome, DirectoryError> {
        let mut tx = self.pool.begin().await?;

        // Lock order: ascending card number
        let (sender, recipient) = if command.sender_card_number == command.recipient_card_number {
            let card = lock_card(&mut tx, &command.sender_card_number).await?;
            (card.clone(), card)
        } else if command.sender_card_number < command.recipient_card_number {
            let s = lock_card(&mut tx, &command.sender_card_number).await?;
            let r = lock_card(&mut tx, &command.recipient_card_number).await?;
            (s, r)
        } else {
            let r = lock_card(&mut tx, &command.recipient_card_number).await?;
            let s = lock_card(&mut tx, &command.sender_card_number).await?;
            (s, r)
        };

        if let Some(existing) = fetch_record(&mut tx, &command.idempotency_key).await? {
            debug!(idempotency_key = %command.idempotency_key, "Transfer already recorded");
            return Ok(ApplyOutcome::AlreadyRecorded(existing));
        }

        if let Err(outcome) = check_transfer(sender.as_ref(), recipient.as_ref(), command.amount) {
            return Ok(ApplyOutcome::Rejected(outcome));
        }

        if command.sender_card_number != command.recipient_card_number {
            add_to_balance(&mut tx, &command.sender_card_number, -command.amount).await?;
            add_to_balance(&mut tx, &command.recipient_card_number, command.amount).await?;
        }

        let record = command.committed_record();
        if !insert_record(&mut tx, &record).await? {
            // Lost a race with a concurrent apply of the same key
            warn!(idempotency_key = %command.idempotency_key, "Ledger conflict, rolling back");
            tx.rollback().await?;
            return match fetch_record(&mut *self.pool.acquire().await?, &command.idempotency_key)
                .await?
            {
                Some(existing) => Ok(ApplyOutcome::AlreadyRecorded(existing)),
                None => Err(DirectoryError::DatabaseError(format!(
                    "ledger conflict for {} without a visible row",
                    command.idempotency_key
                ))),
            };
        }

        if let Err(e) = tx.commit().await {
            error!(idempotency_key = %command.idempotency_key, error = %e, "Failed to commit transfer");
            return Err(e.into());
        }

        Ok(ApplyOutcome::Committed(record))
    }
}
