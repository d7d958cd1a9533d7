//! PostgreSQL ledger (`transactions` table, unique `idempotency_key`)

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Row};

use super::{
    AppendResult, IdempotencyKey, LedgerError, TransactionLedger, TransactionRecord,
    TransferOutcome,
};

const SELECT_COLUMNS: &str = "idempotency_key, sender_card_number, recipient_card_number, \
                              amount, outcome, detail, committed_at";

pub struct PgLedger {
    pool: PgPool,
}

impl PgLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Insert a record on an existing connection or transaction.
///
/// Returns false when the key already exists (nothing written).
pub(crate) async fn insert_record(
    conn: &mut PgConnection,
    record: &TransactionRecord,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        INSERT INTO transactions
            (idempotency_key, sender_card_number, recipient_card_number, amount, outcome, detail, committed_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (idempotency_key) DO NOTHING
        "#,
    )
    .bind(record.idempotency_key.as_str())
    .bind(&record.sender_card_number)
    .bind(&record.recipient_card_number)
    .bind(record.amount)
    .bind(record.outcome.id())
    .bind(&record.detail)
    .bind(record.committed_at)
    .execute(conn)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Fetch a record on an existing connection or transaction
pub(crate) async fn fetch_record(
    conn: &mut PgConnection,
    key: &IdempotencyKey,
) -> Result<Option<TransactionRecord>, LedgerError> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM transactions WHERE idempotency_key = $1",
        SELECT_COLUMNS
    ))
    .bind(key.as_str())
    .fetch_optional(conn)
    .await?;

    row.as_ref().map(row_to_record).transpose()
}

fn row_to_record(row: &PgRow) -> Result<TransactionRecord, LedgerError> {
    let raw_key: String = row.try_get("idempotency_key")?;
    let idempotency_key = IdempotencyKey::parse(&raw_key)
        .ok_or_else(|| LedgerError::Corrupted(format!("invalid idempotency key '{}'", raw_key)))?;
    let outcome_id: i16 = row.try_get("outcome")?;
    let outcome = TransferOutcome::from_id(outcome_id)
        .ok_or_else(|| LedgerError::Corrupted(format!("unknown outcome id {}", outcome_id)))?;
    let amount: Decimal = row.try_get("amount")?;
    let committed_at: DateTime<Utc> = row.try_get("committed_at")?;

    Ok(TransactionRecord {
        idempotency_key,
        sender_card_number: row.try_get("sender_card_number")?,
        recipient_card_number: row.try_get("recipient_card_number")?,
        amount,
        outcome,
        detail: row.try_get("detail")?,
        committed_at,
    })
}

#[async_trait]
impl TransactionLedger for PgLedger {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn find(&self, key: &IdempotencyKey) -> Result<Option<TransactionRecord>, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        fetch_record(&mut conn, key).await
    }

    async fn append(&self, record: &TransactionRecord) -> Result<AppendResult, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        if insert_record(&mut conn, record).await? {
            return Ok(AppendResult::Inserted);
        }

        match fetch_record(&mut conn, &record.idempotency_key).await? {
            Some(existing) => Ok(AppendResult::Existing(existing)),
            None => Err(LedgerError::Corrupted(format!(
                "insert for {} conflicted but no row was found",
                record.idempotency_key
            ))),
        }
    }

    async fn list_for_card(
        &self,
        card_number: &str,
        limit: usize,
    ) -> Result<Vec<TransactionRecord>, LedgerError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM transactions
            WHERE sender_card_number = $1 OR recipient_card_number = $1
            ORDER BY committed_at DESC
            LIMIT $2
            "#,
            SELECT_COLUMNS
        ))
        .bind(card_number)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_record).collect()
    }
}
