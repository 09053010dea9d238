//! Postgres persistence
//!
//! Amounts are NUMERIC(78,0) columns; they are bound as text with an explicit
//! cast and read back with `::TEXT` since sqlx has no lossless mapping to u128.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use eyre::{Result, WrapErr};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{PgConnection, Postgres, Transaction};
use tracing::error;

use crate::store::{ClaimStore, ConfirmationStore, RecordLock, StoreError, StoredClaim};
use crate::types::{ConfirmationRecord, TxHash};

/// Create a database connection pool
pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
        .wrap_err("Failed to connect to database")
}

/// Run pending migrations (uses the migration files in migrations/)
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .wrap_err("Failed to run database migrations")?;
    Ok(())
}

const RECORD_COLUMNS: &str = r#"transaction_hash, status, observed_confirmations, block_number,
    from_address, to_address, input_data, value::TEXT AS value,
    allocated_transaction_hash, allocated_amount::TEXT AS allocated_amount,
    fee_amount::TEXT AS fee_amount, allocated_at, custody_transfer::TEXT AS custody_transfer,
    attempts, next_attempt_at, allocation_hold, created_at, updated_at"#;

/// Records backing off past `$2` are skipped; a NULL `$2` keeps them all
const DUE_FILTER: &str =
    "($2::TIMESTAMPTZ IS NULL OR next_attempt_at IS NULL OR next_attempt_at <= $2)";

const CLAIM_COLUMNS: &str = r#"correlation_id, recipient, token, amount::TEXT AS amount,
    nonce, deadline, signature, created_at"#;

// ============================================================================
// Confirmation Records
// ============================================================================

#[derive(Clone)]
pub struct PgConfirmationStore {
    pool: PgPool,
}

impl PgConfirmationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

async fn fetch_record(
    conn: &mut PgConnection,
    hash: &str,
) -> Result<Option<ConfirmationRecord>, sqlx::Error> {
    let sql = format!(
        "SELECT {} FROM transaction_confirmations WHERE transaction_hash = $1",
        RECORD_COLUMNS
    );
    sqlx::query_as::<_, ConfirmationRecord>(&sql)
        .bind(hash)
        .fetch_optional(conn)
        .await
}

async fn upsert_record(
    conn: &mut PgConnection,
    record: &ConfirmationRecord,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO transaction_confirmations (transaction_hash, status, observed_confirmations,
            block_number, from_address, to_address, input_data, value,
            allocated_transaction_hash, allocated_amount, fee_amount, allocated_at,
            custody_transfer, attempts, next_attempt_at, allocation_hold, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8::NUMERIC, $9, $10::NUMERIC, $11::NUMERIC, $12,
            $13::NUMERIC, $14, $15, $16, $17, $18)
        ON CONFLICT (transaction_hash) DO UPDATE SET
            status = EXCLUDED.status,
            observed_confirmations = EXCLUDED.observed_confirmations,
            allocated_transaction_hash = EXCLUDED.allocated_transaction_hash,
            allocated_amount = EXCLUDED.allocated_amount,
            fee_amount = EXCLUDED.fee_amount,
            allocated_at = EXCLUDED.allocated_at,
            attempts = EXCLUDED.attempts,
            next_attempt_at = EXCLUDED.next_attempt_at,
            allocation_hold = EXCLUDED.allocation_hold,
            updated_at = EXCLUDED.updated_at
        "#,
    )
    .bind(&record.transaction_hash)
    .bind(record.status)
    .bind(record.observed_confirmations)
    .bind(record.block_number)
    .bind(&record.from_address)
    .bind(&record.to_address)
    .bind(&record.input_data)
    .bind(&record.value)
    .bind(&record.allocated_transaction_hash)
    .bind(&record.allocated_amount)
    .bind(&record.fee_amount)
    .bind(record.allocated_at)
    .bind(&record.custody_transfer)
    .bind(record.attempts)
    .bind(record.next_attempt_at)
    .bind(&record.allocation_hold)
    .bind(record.created_at)
    .bind(record.updated_at)
    .execute(conn)
    .await?;
    Ok(())
}

/// Transaction holding `pg_advisory_xact_lock` for one hash. Dropping it
/// rolls back and releases the lock.
struct PgRecordLock {
    tx: Transaction<'static, Postgres>,
    staged: Option<ConfirmationRecord>,
}

#[async_trait]
impl RecordLock for PgRecordLock {
    fn current(&self) -> Option<&ConfirmationRecord> {
        self.staged.as_ref()
    }

    async fn save(&mut self, record: &ConfirmationRecord) -> Result<(), StoreError> {
        upsert_record(&mut self.tx, record).await?;
        self.staged = Some(record.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl ConfirmationStore for PgConfirmationStore {
    async fn lock(&self, hash: &TxHash) -> Result<Box<dyn RecordLock>, StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(hash.as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                error!(tx_hash = %hash, error = ?e, "Failed to take advisory lock");
                e
            })?;

        let staged = fetch_record(&mut tx, hash.as_str()).await?;
        Ok(Box::new(PgRecordLock { tx, staged }))
    }

    async fn get(&self, hash: &TxHash) -> Result<Option<ConfirmationRecord>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        Ok(fetch_record(&mut conn, hash.as_str()).await?)
    }

    async fn pending(
        &self,
        limit: i64,
        due_by: Option<DateTime<Utc>>,
    ) -> Result<Vec<ConfirmationRecord>, StoreError> {
        let sql = format!(
            "SELECT {} FROM transaction_confirmations WHERE status = 'NOT_CONFIRMED' \
             AND {} ORDER BY created_at LIMIT $1",
            RECORD_COLUMNS, DUE_FILTER
        );
        Ok(sqlx::query_as::<_, ConfirmationRecord>(&sql)
            .bind(limit)
            .bind(due_by)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn unallocated(
        &self,
        limit: i64,
        due_by: Option<DateTime<Utc>>,
    ) -> Result<Vec<ConfirmationRecord>, StoreError> {
        let sql = format!(
            "SELECT {} FROM transaction_confirmations WHERE status = 'CONFIRMED' \
             AND allocated_transaction_hash IS NULL AND allocation_hold IS NULL \
             AND {} ORDER BY created_at LIMIT $1",
            RECORD_COLUMNS, DUE_FILTER
        );
        Ok(sqlx::query_as::<_, ConfirmationRecord>(&sql)
            .bind(limit)
            .bind(due_by)
            .fetch_all(&self.pool)
            .await?)
    }
}

// ============================================================================
// Issued Claims
// ============================================================================

#[derive(Clone)]
pub struct PgClaimStore {
    pool: PgPool,
}

impl PgClaimStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ClaimStore for PgClaimStore {
    async fn find_by_correlation(
        &self,
        correlation_id: &str,
    ) -> Result<Option<StoredClaim>, StoreError> {
        let sql = format!(
            "SELECT {} FROM redemption_claims WHERE correlation_id = $1",
            CLAIM_COLUMNS
        );
        Ok(sqlx::query_as::<_, StoredClaim>(&sql)
            .bind(correlation_id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn insert_or_get(&self, claim: &StoredClaim) -> Result<StoredClaim, StoreError> {
        let sql = format!(
            r#"
            INSERT INTO redemption_claims (correlation_id, recipient, token, amount, nonce,
                deadline, signature, created_at)
            VALUES ($1, $2, $3, $4::NUMERIC, $5, $6, $7, $8)
            ON CONFLICT (correlation_id) DO NOTHING
            RETURNING {}
            "#,
            CLAIM_COLUMNS
        );
        let inserted = sqlx::query_as::<_, StoredClaim>(&sql)
            .bind(&claim.correlation_id)
            .bind(&claim.recipient)
            .bind(&claim.token)
            .bind(&claim.amount)
            .bind(claim.nonce)
            .bind(claim.deadline)
            .bind(&claim.signature)
            .bind(claim.created_at)
            .fetch_optional(&self.pool)
            .await?;

        match inserted {
            Some(stored) => Ok(stored),
            // Lost the race; the winner's row is committed by now
            None => self
                .find_by_correlation(&claim.correlation_id)
                .await?
                .ok_or_else(|| StoreError::Missing(claim.correlation_id.clone())),
        }
    }
}
