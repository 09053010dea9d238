//! Transaction confirmation tracker
//!
//! Turns source-chain receipts into persisted confirmation records. Status only
//! moves forward: NOT_CONFIRMED to CONFIRMED once the depth reaches the
//! required count, or NOT_CONFIRMED to REVERTED. A CONFIRMED record is never
//! downgraded, whatever depth a later reading reports.
//!
//! Chain lookups are bounded by a timeout. A slow or failing source chain is
//! "not yet known", and so is a node that has no receipt for a hash already on
//! record: the caller gets the persisted view (or UNSEEN), never an error.

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::Address;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::deposit::logged_custody_transfer;
use crate::metrics;
use crate::source::{ReaderError, SourceChainReader, SourceReceipt};
use crate::store::{ConfirmationStore, StoreError};
use crate::types::{
    ConfirmationRecord, ConfirmationStatus, DepositPayload, InvalidTxHash, Observation, TxHash,
};

/// Blocks on top of the deposit block before it counts as final
pub const DEFAULT_REQUIRED_CONFIRMATIONS: u64 = 65;

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error(transparent)]
    InvalidHash(#[from] InvalidTxHash),

    #[error("REVERTED: source transaction {0} reverted")]
    Reverted(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl TrackerError {
    pub fn code(&self) -> &'static str {
        match self {
            TrackerError::InvalidHash(_) => "INVALID_TRANSACTION_HASH",
            TrackerError::Reverted(_) => "REVERTED",
            TrackerError::Store(e) => e.code(),
        }
    }
}

pub struct ConfirmationTracker {
    reader: Arc<dyn SourceChainReader>,
    store: Arc<dyn ConfirmationStore>,
    /// Deposits are paid into this address; used to read token transfer logs
    custody: Address,
    required_confirmations: u64,
    lookup_timeout: Duration,
}

impl ConfirmationTracker {
    pub fn new(
        reader: Arc<dyn SourceChainReader>,
        store: Arc<dyn ConfirmationStore>,
        custody: Address,
        required_confirmations: u64,
        lookup_timeout: Duration,
    ) -> Self {
        Self {
            reader,
            store,
            custody,
            required_confirmations,
            lookup_timeout,
        }
    }

    pub fn required_confirmations(&self) -> u64 {
        self.required_confirmations
    }

    /// Check the chain for `hash` and record what was seen
    pub async fn observe(&self, hash: &str) -> Result<Observation, TrackerError> {
        let hash = TxHash::parse(hash)?;

        let (receipt, head) = match self.lookup(&hash).await {
            Ok(Some(found)) => found,
            Ok(None) => {
                // Lagging node or a reorg; what is on record still stands
                debug!(tx_hash = %hash, "No receipt from source, using persisted view");
                return self.persisted_view(&hash).await;
            }
            Err(e) => {
                warn!(tx_hash = %hash, error = %e, "Source lookup failed, using persisted view");
                return self.persisted_view(&hash).await;
            }
        };

        if !receipt.succeeded {
            return self.record_revert(&hash, receipt).await;
        }

        let confirmations = head.saturating_sub(receipt.block_number);

        let mut lock = self.store.lock(&hash).await?;
        let (mut record, created) = match lock.current() {
            Some(existing) => (existing.clone(), false),
            None => (
                ConfirmationRecord::first_observation(
                    &hash,
                    receipt.block_number,
                    payload_of(&receipt, &self.custody),
                ),
                true,
            ),
        };

        if record.status == ConfirmationStatus::Reverted {
            drop(lock);
            metrics::record_observation("REVERTED");
            return Err(TrackerError::Reverted(hash.to_string()));
        }

        let was_confirmed = record.status == ConfirmationStatus::Confirmed;
        let changed = record.record_depth(confirmations, self.required_confirmations);
        if created || changed {
            lock.save(&record).await?;
        }
        lock.commit().await?;

        if record.status == ConfirmationStatus::Confirmed && !was_confirmed {
            info!(
                tx_hash = %hash,
                block = receipt.block_number,
                confirmations,
                "Deposit confirmed"
            );
        }

        let observation = Observation {
            transaction_hash: hash,
            confirmations,
            status: record.observed_status(),
            live: true,
        };
        metrics::record_observation(observation.status.as_str());
        Ok(observation)
    }

    /// Receipt and head under the lookup timeout; `Ok(None)` while not mined
    async fn lookup(&self, hash: &TxHash) -> Result<Option<(SourceReceipt, u64)>, ReaderError> {
        let receipt = tokio::time::timeout(self.lookup_timeout, self.reader.transaction_receipt(hash))
            .await
            .map_err(|_| ReaderError::Timeout)??;

        let Some(receipt) = receipt else {
            return Ok(None);
        };

        let head = tokio::time::timeout(self.lookup_timeout, self.reader.block_height())
            .await
            .map_err(|_| ReaderError::Timeout)??;

        Ok(Some((receipt, head)))
    }

    /// What the store knows, for when the chain cannot be asked
    async fn persisted_view(&self, hash: &TxHash) -> Result<Observation, TrackerError> {
        let record = match self.store.get(hash).await {
            Ok(record) => record,
            Err(e) => {
                warn!(tx_hash = %hash, error = %e, "Store read failed during fallback");
                None
            }
        };

        let observation = match record {
            Some(record) if record.status == ConfirmationStatus::Reverted => {
                return Err(TrackerError::Reverted(hash.to_string()));
            }
            Some(record) => Observation {
                transaction_hash: hash.clone(),
                confirmations: record.observed_confirmations.max(0) as u64,
                status: record.observed_status(),
                live: false,
            },
            None => Observation::unseen(hash),
        };
        metrics::record_observation(observation.status.as_str());
        Ok(observation)
    }

    async fn record_revert(
        &self,
        hash: &TxHash,
        receipt: SourceReceipt,
    ) -> Result<Observation, TrackerError> {
        let mut lock = self.store.lock(hash).await?;
        let mut record = match lock.current() {
            Some(existing) => existing.clone(),
            None => ConfirmationRecord::first_observation(
                hash,
                receipt.block_number,
                payload_of(&receipt, &self.custody),
            ),
        };

        if record.status == ConfirmationStatus::Confirmed {
            // Depth already reached; the record is final.
            lock.commit().await?;
            warn!(tx_hash = %hash, "Reverted receipt for a confirmed deposit, keeping CONFIRMED");
            let observation = Observation {
                transaction_hash: hash.clone(),
                confirmations: record.observed_confirmations.max(0) as u64,
                status: record.observed_status(),
                live: true,
            };
            metrics::record_observation(observation.status.as_str());
            return Ok(observation);
        }

        if record.mark_reverted() {
            lock.save(&record).await?;
        }
        lock.commit().await?;

        info!(tx_hash = %hash, block = receipt.block_number, "Source transaction reverted");
        metrics::record_observation("REVERTED");
        Err(TrackerError::Reverted(hash.to_string()))
    }
}

fn payload_of(receipt: &SourceReceipt, custody: &Address) -> DepositPayload {
    let custody_transfer = receipt
        .to
        .as_deref()
        .and_then(|token| logged_custody_transfer(&receipt.logs, token, custody))
        .map(|amount| amount.to_string());

    DepositPayload {
        from_address: receipt.from.clone(),
        to_address: receipt.to.clone(),
        input_data: format!("0x{}", hex::encode(&receipt.input)),
        value: receipt.value.to_string(),
        custody_transfer,
    }
}
