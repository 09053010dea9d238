//! Allocation orchestrator
//!
//! Pays out a CONFIRMED deposit on the destination chain exactly once.
//!
//! The per-hash store lock is held from the status check until the
//! destination hash is committed, so concurrent callers for one deposit are
//! serialized and all but the first see ALREADY_ALLOCATED. The vault rejects a
//! second release for the same reference; if the operator crashed between
//! broadcast and commit, the next attempt recovers the earlier release hash
//! instead of paying twice.

use std::sync::Arc;
use std::time::Instant;

use alloy::primitives::Address;
use thiserror::Error;
use tracing::{info, warn};

use crate::address::AddressValidator;
use crate::deposit::{decode_deposit, DepositError, TokenRoutes};
use crate::destination::{DestinationWriter, TransferError};
use crate::metrics;
use crate::retry::{with_retry, Classify, RetryPolicy};
use crate::store::{ConfirmationStore, StoreError};
use crate::types::{ConfirmationRecord, ConfirmationStatus, InvalidTxHash, TxHash};

/// Fee denominator: `fee_bps` is in hundredths of a percent
pub const BPS_DENOMINATOR: u128 = 10_000;

/// Default fee: 0.3%
pub const DEFAULT_FEE_BPS: u32 = 30;

#[derive(Debug, Error)]
pub enum AllocationError {
    #[error(transparent)]
    InvalidHash(#[from] InvalidTxHash),

    #[error("NOT_FOUND: no confirmation record for {0}")]
    NotFound(String),

    #[error("NOT_CONFIRMED: {0} has not reached the required confirmations")]
    NotConfirmed(String),

    #[error("ALREADY_ALLOCATED: {transaction_hash} was paid out in {destination_tx_hash}")]
    AlreadyAllocated {
        transaction_hash: String,
        destination_tx_hash: String,
    },

    #[error("REVERTED: source transaction {0} reverted")]
    Reverted(String),

    #[error("DESTINATION_ADDRESS_INVALID: {0}")]
    InvalidDestination(String),

    #[error(transparent)]
    Deposit(#[from] DepositError),

    #[error("AMOUNT_BELOW_FEE: amount {amount} leaves nothing after fee {fee}")]
    BelowFee { amount: u128, fee: u128 },

    #[error(transparent)]
    Transfer(TransferError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AllocationError {
    pub fn code(&self) -> &str {
        match self {
            AllocationError::InvalidHash(_) => "INVALID_TRANSACTION_HASH",
            AllocationError::NotFound(_) => "NOT_FOUND",
            AllocationError::NotConfirmed(_) => "NOT_CONFIRMED",
            AllocationError::AlreadyAllocated { .. } => "ALREADY_ALLOCATED",
            AllocationError::Reverted(_) => "REVERTED",
            AllocationError::InvalidDestination(_) => "DESTINATION_ADDRESS_INVALID",
            AllocationError::Deposit(DepositError::InvalidPayload(_)) => "INVALID_DEPOSIT_PAYLOAD",
            AllocationError::Deposit(DepositError::UnroutedToken(_)) => "TOKEN_NOT_SUPPORTED",
            AllocationError::BelowFee { .. } => "AMOUNT_BELOW_FEE",
            AllocationError::Transfer(e) => e.code(),
            AllocationError::Store(e) => e.code(),
        }
    }

    /// Worth another attempt later
    pub fn is_transient(&self) -> bool {
        match self {
            AllocationError::NotConfirmed(_) | AllocationError::Store(_) => true,
            AllocationError::Transfer(e) => e.is_transient(),
            _ => false,
        }
    }
}

/// A completed payout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    pub transaction_hash: String,
    pub destination_tx_hash: String,
    pub token: String,
    pub destination: String,
    /// Net amount released, vault units
    pub amount: u128,
    pub fee: u128,
}

/// Static allocation parameters
#[derive(Debug, Clone)]
pub struct AllocationSettings {
    /// Source-chain custody address deposits must be sent to
    pub custody: Address,
    pub routes: TokenRoutes,
    /// Bech32 prefix of destination addresses
    pub address_prefix: String,
    pub fee_bps: u32,
    pub retry: RetryPolicy,
}

/// What one deposit pays out
#[derive(Debug, Clone, PartialEq, Eq)]
struct Payout {
    token: String,
    destination: String,
    gross: u128,
    fee: u128,
    net: u128,
}

/// `amount * bps / 10_000`, rounded down, without intermediate overflow
pub fn fee_for(amount: u128, fee_bps: u32) -> u128 {
    let bps = fee_bps as u128;
    (amount / BPS_DENOMINATOR) * bps + (amount % BPS_DENOMINATOR) * bps / BPS_DENOMINATOR
}

pub struct AllocationOrchestrator {
    store: Arc<dyn ConfirmationStore>,
    writer: Arc<dyn DestinationWriter>,
    validator: Arc<dyn AddressValidator>,
    settings: AllocationSettings,
}

impl AllocationOrchestrator {
    pub fn new(
        store: Arc<dyn ConfirmationStore>,
        writer: Arc<dyn DestinationWriter>,
        validator: Arc<dyn AddressValidator>,
        settings: AllocationSettings,
    ) -> Self {
        Self {
            store,
            writer,
            validator,
            settings,
        }
    }

    /// Pay out the deposit `hash` and persist the destination hash
    pub async fn allocate(&self, hash: &str) -> Result<Allocation, AllocationError> {
        let started = Instant::now();
        let result = self.allocate_inner(hash).await;

        match &result {
            Ok(allocation) => {
                metrics::record_allocation("ALLOCATED");
                metrics::record_allocated(
                    &allocation.token,
                    allocation.amount,
                    allocation.fee,
                    started.elapsed().as_secs_f64(),
                );
            }
            Err(e) => metrics::record_allocation(e.code()),
        }
        result
    }

    async fn allocate_inner(&self, hash: &str) -> Result<Allocation, AllocationError> {
        let hash = TxHash::parse(hash)?;

        let mut lock = self.store.lock(&hash).await?;
        let Some(mut record) = lock.current().cloned() else {
            return Err(AllocationError::NotFound(hash.to_string()));
        };

        match record.status {
            ConfirmationStatus::Reverted => return Err(AllocationError::Reverted(hash.to_string())),
            ConfirmationStatus::NotConfirmed => {
                return Err(AllocationError::NotConfirmed(hash.to_string()))
            }
            ConfirmationStatus::Confirmed => {}
        }
        if let Some(destination_tx_hash) = &record.allocated_transaction_hash {
            return Err(AllocationError::AlreadyAllocated {
                transaction_hash: hash.to_string(),
                destination_tx_hash: destination_tx_hash.clone(),
            });
        }

        let payout = self.plan(&record)?;
        let destination_tx_hash = self.release(&hash, &payout).await?;

        // Must be durable before returning: it is the only guard against
        // paying this deposit again.
        record.record_allocation(&destination_tx_hash, payout.net, payout.fee);
        lock.save(&record).await?;
        lock.commit().await?;

        info!(
            tx_hash = %hash,
            destination_tx_hash = %destination_tx_hash,
            token = %payout.token,
            destination = %payout.destination,
            gross = payout.gross,
            amount = payout.net,
            fee = payout.fee,
            "Deposit allocated"
        );

        Ok(Allocation {
            transaction_hash: hash.to_string(),
            destination_tx_hash,
            token: payout.token,
            destination: payout.destination,
            amount: payout.net,
            fee: payout.fee,
        })
    }

    /// Decode, route, validate and price the deposit. Nothing is sent.
    fn plan(&self, record: &ConfirmationRecord) -> Result<Payout, AllocationError> {
        let deposit = decode_deposit(&record.payload(), &self.settings.custody)?;
        let route = self.settings.routes.get(&deposit.source_token)?;

        let gross = route.normalize(deposit.amount).ok_or_else(|| {
            DepositError::InvalidPayload(format!("amount {} out of range", deposit.amount))
        })?;

        if !self
            .validator
            .is_valid_address(&deposit.destination, &self.settings.address_prefix)
        {
            return Err(AllocationError::InvalidDestination(deposit.destination));
        }

        let fee = fee_for(gross, self.settings.fee_bps);
        let net = gross.saturating_sub(fee);
        if net == 0 {
            return Err(AllocationError::BelowFee { amount: gross, fee });
        }

        Ok(Payout {
            token: route.vault_token.clone(),
            destination: deposit.destination,
            gross,
            fee,
            net,
        })
    }

    /// Release through the writer with retries. A release the vault already
    /// holds for this reference is recovered rather than treated as failure.
    async fn release(&self, hash: &TxHash, payout: &Payout) -> Result<String, AllocationError> {
        let writer = self.writer.as_ref();
        let token = payout.token.as_str();
        let destination = payout.destination.as_str();
        let amount = payout.net;
        let reference = hash.as_str();

        let sent = with_retry(&self.settings.retry, "vault_release", move |_attempt| async move {
            let result = writer.transfer(token, destination, amount, reference).await;
            metrics::record_transfer_attempt(match &result {
                Ok(_) => "success",
                Err(e) if e.is_transient() => "transient",
                Err(_) => "failed",
            });
            result
        })
        .await;

        match sent {
            Ok(destination_tx_hash) => Ok(destination_tx_hash),
            Err(TransferError::AlreadyReleased { reference }) => {
                match self
                    .writer
                    .find_transfer(&reference)
                    .await
                    .map_err(AllocationError::Transfer)?
                {
                    Some(earlier) => {
                        warn!(
                            tx_hash = %hash,
                            destination_tx_hash = %earlier,
                            "Recovered release from an earlier attempt"
                        );
                        Ok(earlier)
                    }
                    None => {
                        warn!(tx_hash = %hash, "Vault holds a release that cannot be located");
                        Err(AllocationError::Transfer(TransferError::AlreadyReleased {
                            reference,
                        }))
                    }
                }
            }
            Err(e) => Err(AllocationError::Transfer(e)),
        }
    }
}
