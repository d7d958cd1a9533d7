//! PostgreSQL schema
//!
//! All statements are idempotent so the bootstrap can run on every start.

use sqlx::PgPool;

/// Initialize tables and indexes
pub async fn init_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    tracing::info!("Initializing PostgreSQL schema...");

    for statement in [
        CREATE_CARDS_TABLE,
        CREATE_CARDS_USER_INDEX,
        CREATE_TRANSACTIONS_TABLE,
        CREATE_TRANSACTIONS_SENDER_INDEX,
        CREATE_TRANSACTIONS_RECIPIENT_INDEX,
        CREATE_TRANSFER_QUEUE_TABLE,
        CREATE_TRANSFER_QUEUE_READY_INDEX,
    ] {
        sqlx::query(statement).execute(pool).await?;
    }

    tracing::info!("PostgreSQL schema ready");
    Ok(())
}

/// Card directory. Balance can never go negative, enforced by the database too.
pub const CREATE_CARDS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS cards (
    card_id       BIGSERIAL PRIMARY KEY,
    user_id       BIGINT NOT NULL,
    username      TEXT NOT NULL,
    card_number   TEXT NOT NULL UNIQUE,
    card_type     TEXT NOT NULL,
    expiry_date   DATE NOT NULL,
    availability  BOOLEAN NOT NULL DEFAULT TRUE,
    balance       NUMERIC(20, 2) NOT NULL DEFAULT 100 CHECK (balance >= 0),
    created_at    TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at    TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

pub const CREATE_CARDS_USER_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_cards_user_id ON cards (user_id)";

/// Append-only ledger, one row per idempotency key
pub const CREATE_TRANSACTIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS transactions (
    idempotency_key        TEXT PRIMARY KEY,
    sender_card_number     TEXT NOT NULL,
    recipient_card_number  TEXT NOT NULL,
    amount                 NUMERIC(20, 2) NOT NULL,
    outcome                SMALLINT NOT NULL,
    detail                 TEXT,
    committed_at           TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

pub const CREATE_TRANSACTIONS_SENDER_INDEX: &str = "CREATE INDEX IF NOT EXISTS idx_transactions_sender \
     ON transactions (sender_card_number, committed_at DESC)";

pub const CREATE_TRANSACTIONS_RECIPIENT_INDEX: &str = "CREATE INDEX IF NOT EXISTS idx_transactions_recipient \
     ON transactions (recipient_card_number, committed_at DESC)";

/// Durable transfer queue. A row stays until acknowledged (deleted) or dead-lettered.
pub const CREATE_TRANSFER_QUEUE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS transfer_queue (
    delivery_tag   BIGSERIAL PRIMARY KEY,
    queue_name     TEXT NOT NULL,
    message_id     TEXT NOT NULL,
    body           JSONB NOT NULL,
    attempts       INTEGER NOT NULL DEFAULT 0,
    visible_at     TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    dead_lettered  BOOLEAN NOT NULL DEFAULT FALSE,
    last_error     TEXT,
    enqueued_at    TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

pub const CREATE_TRANSFER_QUEUE_READY_INDEX: &str = "CREATE INDEX IF NOT EXISTS idx_transfer_queue_ready \
     ON transfer_queue (queue_name, visible_at) WHERE dead_lettered = FALSE";
