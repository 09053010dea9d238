//! Common types for confirmation tracking and allocation
//!
//! `ConfirmationStatus` carries sqlx integration so records round-trip
//! through Postgres as plain VARCHAR values.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Transaction Hash
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("INVALID_TRANSACTION_HASH: {0}")]
pub struct InvalidTxHash(pub String);

/// Source-chain transaction hash, `0x` followed by 64 hex characters.
///
/// Stored lowercased so lookups are case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct TxHash(String);

impl TxHash {
    pub fn parse(raw: &str) -> Result<Self, InvalidTxHash> {
        let trimmed = raw.trim();
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .ok_or_else(|| InvalidTxHash(raw.to_string()))?;

        if digits.len() != 64 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(InvalidTxHash(raw.to_string()));
        }

        Ok(Self(format!("0x{}", digits.to_ascii_lowercase())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for TxHash {
    type Err = InvalidTxHash;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Statuses
// ============================================================================

/// Persisted status of a confirmation record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConfirmationStatus {
    NotConfirmed,
    Confirmed,
    Reverted,
}

impl ConfirmationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfirmationStatus::NotConfirmed => "NOT_CONFIRMED",
            ConfirmationStatus::Confirmed => "CONFIRMED",
            ConfirmationStatus::Reverted => "REVERTED",
        }
    }
}

impl fmt::Display for ConfirmationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Status reported by an observation. `Unseen` is never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ObservedStatus {
    Unseen,
    NotConfirmed,
    Confirmed,
}

impl ObservedStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObservedStatus::Unseen => "UNSEEN",
            ObservedStatus::NotConfirmed => "NOT_CONFIRMED",
            ObservedStatus::Confirmed => "CONFIRMED",
        }
    }
}

/// Result of one `observe` call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Observation {
    pub transaction_hash: TxHash,
    pub confirmations: u64,
    pub status: ObservedStatus,
    /// False when the source chain had no receipt or could not be reached
    /// and the persisted view was reported instead
    #[serde(skip)]
    pub live: bool,
}

impl Observation {
    pub fn unseen(hash: &TxHash) -> Self {
        Self {
            transaction_hash: hash.clone(),
            confirmations: 0,
            status: ObservedStatus::Unseen,
            live: false,
        }
    }

    pub fn is_confirmed(&self) -> bool {
        self.status == ObservedStatus::Confirmed
    }
}

// ============================================================================
// Confirmation Record
// ============================================================================

/// Deposit transaction fields captured on first observation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositPayload {
    pub from_address: String,
    /// Recipient of the source transaction (custody address or token contract)
    pub to_address: Option<String>,
    /// Calldata, 0x-prefixed hex
    pub input_data: String,
    /// Native value in wei, decimal string
    pub value: String,
    /// Sum of ERC-20 `Transfer` logs into the custody address emitted by
    /// `to_address`, decimal string. `None` when no such log exists.
    pub custody_transfer: Option<String>,
}

/// One row of `transaction_confirmations`
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct ConfirmationRecord {
    pub transaction_hash: String,
    pub status: ConfirmationStatus,
    pub observed_confirmations: i64,
    pub block_number: i64,
    pub from_address: String,
    pub to_address: Option<String>,
    pub input_data: String,
    pub value: String,
    pub allocated_transaction_hash: Option<String>,
    pub allocated_amount: Option<String>,
    pub fee_amount: Option<String>,
    pub allocated_at: Option<DateTime<Utc>>,
    pub custody_transfer: Option<String>,
    /// Failed background attempts since the last state change
    pub attempts: i32,
    /// Background processing skips the record until then
    pub next_attempt_at: Option<DateTime<Utc>>,
    /// Code of a terminal allocation failure; only an explicit allocation
    /// request retries a held record
    pub allocation_hold: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConfirmationRecord {
    /// New record for a transaction seen mined for the first time
    pub fn first_observation(hash: &TxHash, block_number: u64, payload: DepositPayload) -> Self {
        let now = Utc::now();
        Self {
            transaction_hash: hash.to_string(),
            status: ConfirmationStatus::NotConfirmed,
            observed_confirmations: 0,
            block_number: block_number as i64,
            from_address: payload.from_address,
            to_address: payload.to_address,
            input_data: payload.input_data,
            value: payload.value,
            allocated_transaction_hash: None,
            allocated_amount: None,
            fee_amount: None,
            allocated_at: None,
            custody_transfer: payload.custody_transfer,
            attempts: 0,
            next_attempt_at: None,
            allocation_hold: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn payload(&self) -> DepositPayload {
        DepositPayload {
            from_address: self.from_address.clone(),
            to_address: self.to_address.clone(),
            input_data: self.input_data.clone(),
            value: self.value.clone(),
            custody_transfer: self.custody_transfer.clone(),
        }
    }

    pub fn is_allocated(&self) -> bool {
        self.allocated_transaction_hash.is_some()
    }

    /// Apply a fresh depth reading. Status only moves forward and the stored
    /// depth never shrinks. Returns true when anything changed.
    pub fn record_depth(&mut self, confirmations: u64, required: u64) -> bool {
        if self.status == ConfirmationStatus::Reverted {
            return false;
        }
        let mut changed = false;

        let depth = confirmations.min(i64::MAX as u64) as i64;
        if depth > self.observed_confirmations {
            self.observed_confirmations = depth;
            changed = true;
        }

        if self.status == ConfirmationStatus::NotConfirmed && confirmations >= required {
            self.status = ConfirmationStatus::Confirmed;
            self.reset_schedule();
            changed = true;
        }

        if changed {
            self.updated_at = Utc::now();
        }
        changed
    }

    /// Mark the source transaction as reverted. CONFIRMED records are left alone.
    pub fn mark_reverted(&mut self) -> bool {
        if self.status != ConfirmationStatus::NotConfirmed {
            return false;
        }
        self.status = ConfirmationStatus::Reverted;
        self.updated_at = Utc::now();
        true
    }

    /// Record the destination transfer. Only valid once, on a CONFIRMED record.
    pub fn record_allocation(&mut self, destination_tx_hash: &str, amount: u128, fee: u128) {
        let now = Utc::now();
        self.allocated_transaction_hash = Some(destination_tx_hash.to_string());
        self.allocated_amount = Some(amount.to_string());
        self.fee_amount = Some(fee.to_string());
        self.allocated_at = Some(now);
        self.allocation_hold = None;
        self.reset_schedule();
        self.updated_at = now;
    }

    /// Whether background processing may pick the record up at `now`
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.allocation_hold.is_none() && self.next_attempt_at.map_or(true, |at| at <= now)
    }

    /// Count a failed background attempt and skip the record until `at`
    pub fn schedule_retry(&mut self, at: DateTime<Utc>) {
        self.attempts = self.attempts.saturating_add(1);
        self.next_attempt_at = Some(at);
        self.updated_at = Utc::now();
    }

    /// Park the record after a failure that retrying cannot fix
    pub fn hold_allocation(&mut self, code: &str) {
        self.allocation_hold = Some(code.to_string());
        self.next_attempt_at = None;
        self.updated_at = Utc::now();
    }

    /// Forget failed attempts, e.g. once progress resumes
    pub fn reset_schedule(&mut self) {
        self.attempts = 0;
        self.next_attempt_at = None;
    }

    /// The status as an observation would report it
    pub fn observed_status(&self) -> ObservedStatus {
        match self.status {
            ConfirmationStatus::Confirmed => ObservedStatus::Confirmed,
            _ => ObservedStatus::NotConfirmed,
        }
    }
}
