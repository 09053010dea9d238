//! Persistence seams for confirmation records and issued claims
//!
//! Both stores give read-modify-write atomicity per record:
//! - `ConfirmationStore::lock` serializes every check-then-write on one
//!   transaction hash. Dropping a [`RecordLock`] without `commit` discards
//!   staged writes.
//! - `ClaimStore::insert_or_get` converges concurrent issuers on the first
//!   stored claim for a correlation id.
//!
//! Postgres implementations live in [`crate::db`]; [`memory`] backs tests and
//! single-process deployments.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::types::{ConfirmationRecord, TxHash};

pub mod memory;

pub use memory::{MemoryClaimStore, MemoryConfirmationStore};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("record {0} missing after insert conflict")]
    Missing(String),

    #[error("lock held for {held} cannot write {record}")]
    WrongRecord { held: String, record: String },
}

impl StoreError {
    pub fn code(&self) -> &'static str {
        "STORE_UNAVAILABLE"
    }
}

// ============================================================================
// Confirmation Records
// ============================================================================

/// Exclusive handle on one transaction hash
#[async_trait]
pub trait RecordLock: Send {
    /// The record as staged under this lock
    fn current(&self) -> Option<&ConfirmationRecord>;

    /// Stage a write; visible to others only after `commit`
    async fn save(&mut self, record: &ConfirmationRecord) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}

#[async_trait]
pub trait ConfirmationStore: Send + Sync {
    /// Acquire the per-hash lock and read the record under it
    async fn lock(&self, hash: &TxHash) -> Result<Box<dyn RecordLock>, StoreError>;

    /// Unlocked read of the last committed record
    async fn get(&self, hash: &TxHash) -> Result<Option<ConfirmationRecord>, StoreError>;

    /// NOT_CONFIRMED records, oldest first. With `due_by`, records whose
    /// `next_attempt_at` is later are left out before the limit applies.
    async fn pending(
        &self,
        limit: i64,
        due_by: Option<DateTime<Utc>>,
    ) -> Result<Vec<ConfirmationRecord>, StoreError>;

    /// CONFIRMED records with no allocation and no hold, oldest first.
    /// `due_by` filters like [`ConfirmationStore::pending`].
    async fn unallocated(
        &self,
        limit: i64,
        due_by: Option<DateTime<Utc>>,
    ) -> Result<Vec<ConfirmationRecord>, StoreError>;
}

// ============================================================================
// Issued Claims
// ============================================================================

/// One row of `redemption_claims`
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct StoredClaim {
    pub correlation_id: String,
    pub recipient: String,
    pub token: String,
    /// Decimal string
    pub amount: String,
    pub nonce: i64,
    /// Unix seconds
    pub deadline: i64,
    /// Compact signature, hex without prefix
    pub signature: String,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait ClaimStore: Send + Sync {
    async fn find_by_correlation(
        &self,
        correlation_id: &str,
    ) -> Result<Option<StoredClaim>, StoreError>;

    /// Store `claim` unless one exists for its correlation id; returns the
    /// claim that ends up stored.
    async fn insert_or_get(&self, claim: &StoredClaim) -> Result<StoredClaim, StoreError>;
}
