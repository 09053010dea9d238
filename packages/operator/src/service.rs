//! Operations exposed to callers
//!
//! `BridgeService` is the seam between transport (the HTTP API) and the
//! tracker, orchestrator and claim authority. It also owns the success
//! equivalences: a repeated allocation returns the original destination hash
//! and a repeated claim request returns the stored claim.

use std::sync::Arc;

use bridge_vault::msg::RedemptionClaim;
use cosmwasm_std::Uint128;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::claims::{ClaimAuthority, ClaimError};
use crate::orchestrator::{AllocationError, AllocationOrchestrator};
use crate::tracker::{ConfirmationTracker, TrackerError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmationCheck {
    pub confirmations: u64,
    pub is_confirmed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationReceipt {
    pub destination_tx_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimRequest {
    pub recipient: String,
    pub token: String,
    pub amount: Uint128,
    pub correlation_id: String,
}

/// How a failure should be reported to the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed input
    Invalid,
    NotFound,
    /// Valid request, wrong state (not yet confirmed, reverted, ...)
    Conflict,
    /// Refused by policy (allowance, fee, token support)
    Rejected,
    /// A chain is unreachable; retry later
    Unavailable,
    Internal,
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Tracker(#[from] TrackerError),

    #[error(transparent)]
    Allocation(#[from] AllocationError),

    #[error(transparent)]
    Claim(#[from] ClaimError),
}

impl ServiceError {
    pub fn code(&self) -> &str {
        match self {
            ServiceError::Tracker(e) => e.code(),
            ServiceError::Allocation(e) => e.code(),
            ServiceError::Claim(e) => e.code(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self.code() {
            "INVALID_TRANSACTION_HASH"
            | "DESTINATION_ADDRESS_INVALID"
            | "INVALID_AMOUNT"
            | "INVALID_CORRELATION_ID" => ErrorKind::Invalid,
            "NOT_FOUND" => ErrorKind::NotFound,
            "NOT_CONFIRMED" | "REVERTED" | "INVALID_DEPOSIT_PAYLOAD"
            | "CORRELATION_ID_CONFLICT" => ErrorKind::Conflict,
            "TOKEN_NOT_SUPPORTED"
            | "AMOUNT_BELOW_FEE"
            | "EXCEEDS_DAILY_ALLOWANCE"
            | "STILL_IN_CHANGE_ALLOWANCE_PERIOD"
            | "INSUFFICIENT_FUNDS"
            | "TRANSFER_REJECTED" => ErrorKind::Rejected,
            "DESTINATION_UNAVAILABLE" | "SOURCE_UNAVAILABLE" | "NONCE_UNAVAILABLE" => {
                ErrorKind::Unavailable
            }
            _ => ErrorKind::Internal,
        }
    }

    /// Failures that may indicate tampering or an inconsistent ledger
    fn is_integrity(&self) -> bool {
        matches!(
            self.code(),
            "REVERTED" | "INVALID_DEPOSIT_PAYLOAD" | "CORRELATION_ID_CONFLICT" | "RELEASE_UNRESOLVED"
        )
    }

    fn log(&self, operation: &str, subject: &str) {
        if self.is_integrity() {
            warn!(operation, subject, code = self.code(), error = %self, "Integrity check failed");
        } else if self.kind() == ErrorKind::Internal {
            error!(operation, subject, code = self.code(), error = ?self, "Internal failure");
        } else {
            debug!(operation, subject, code = self.code(), error = %self, "Request refused");
        }
    }
}

pub struct BridgeService {
    tracker: Arc<ConfirmationTracker>,
    orchestrator: Arc<AllocationOrchestrator>,
    claims: Arc<ClaimAuthority>,
}

impl BridgeService {
    pub fn new(
        tracker: Arc<ConfirmationTracker>,
        orchestrator: Arc<AllocationOrchestrator>,
        claims: Arc<ClaimAuthority>,
    ) -> Self {
        Self {
            tracker,
            orchestrator,
            claims,
        }
    }

    pub async fn submit_confirmation_check(
        &self,
        transaction_hash: &str,
    ) -> Result<ConfirmationCheck, ServiceError> {
        let observation = self
            .tracker
            .observe(transaction_hash)
            .await
            .map_err(|e| self.fail(e.into(), "submit_confirmation_check", transaction_hash))?;

        Ok(ConfirmationCheck {
            confirmations: observation.confirmations,
            is_confirmed: observation.is_confirmed(),
        })
    }

    pub async fn request_allocation(
        &self,
        transaction_hash: &str,
    ) -> Result<AllocationReceipt, ServiceError> {
        match self.orchestrator.allocate(transaction_hash).await {
            Ok(allocation) => Ok(AllocationReceipt {
                destination_tx_hash: allocation.destination_tx_hash,
            }),
            Err(AllocationError::AlreadyAllocated {
                destination_tx_hash,
                ..
            }) => Ok(AllocationReceipt {
                destination_tx_hash,
            }),
            Err(e) => Err(self.fail(e.into(), "request_allocation", transaction_hash)),
        }
    }

    pub async fn request_claim(&self, request: &ClaimRequest) -> Result<RedemptionClaim, ServiceError> {
        self.claims
            .issue_claim(
                &request.recipient,
                &request.token,
                request.amount.u128(),
                &request.correlation_id,
            )
            .await
            .map_err(|e| self.fail(e.into(), "request_claim", &request.correlation_id))
    }

    fn fail(&self, error: ServiceError, operation: &str, subject: &str) -> ServiceError {
        error.log(operation, subject);
        error
    }
}
