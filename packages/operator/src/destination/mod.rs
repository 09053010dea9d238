//! Destination chain (vault) access
//!
//! The orchestrator pays out through [`DestinationWriter`]; the claim
//! authority reads recipient nonces through [`NonceSource`]. Both are
//! implemented by [`VaultClient`].

use async_trait::async_trait;
use thiserror::Error;

use crate::retry::{classify_message, Classify, ErrorClass};

pub mod vault_client;

pub use vault_client::{VaultClient, VaultClientConfig};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransferError {
    #[error("INSUFFICIENT_FUNDS: {0}")]
    InsufficientFunds(String),

    /// The vault already paid out this reference
    #[error("reference {reference} already released")]
    AlreadyReleased { reference: String },

    /// Policy rejection from the vault, carrying its code
    #[error("{code}: {message}")]
    Rejected { code: String, message: String },

    #[error("destination chain unreachable: {0}")]
    Network(String),

    /// Broadcast accepted but inclusion not observed in time
    #[error("transaction {tx_hash} not yet included")]
    Unconfirmed { tx_hash: String },
}

impl TransferError {
    pub fn code(&self) -> &str {
        match self {
            TransferError::InsufficientFunds(_) => "INSUFFICIENT_FUNDS",
            TransferError::AlreadyReleased { .. } => "RELEASE_UNRESOLVED",
            TransferError::Rejected { code, .. } => code,
            TransferError::Network(_) | TransferError::Unconfirmed { .. } => {
                "DESTINATION_UNAVAILABLE"
            }
        }
    }
}

impl Classify for TransferError {
    fn class(&self) -> ErrorClass {
        match self {
            TransferError::Network(_) | TransferError::Unconfirmed { .. } => ErrorClass::Transient,
            _ => ErrorClass::Permanent,
        }
    }
}

/// Vault error codes passed through verbatim
const POLICY_CODES: &[&str] = &[
    "EXCEEDS_DAILY_ALLOWANCE",
    "STILL_IN_CHANGE_ALLOWANCE_PERIOD",
    "TOKEN_NOT_SUPPORTED",
];

/// Map a failed transaction (non-zero code) to a [`TransferError`]
pub fn classify_failure(reference: &str, code: u64, raw_log: &str) -> TransferError {
    if raw_log.contains("Reference already released") {
        return TransferError::AlreadyReleased {
            reference: reference.to_string(),
        };
    }
    if raw_log.contains("insufficient funds") {
        return TransferError::InsufficientFunds(raw_log.to_string());
    }
    if let Some(policy) = POLICY_CODES.iter().find(|c| raw_log.contains(*c)) {
        return TransferError::Rejected {
            code: policy.to_string(),
            message: raw_log.to_string(),
        };
    }
    if classify_message(raw_log) == ErrorClass::Transient {
        return TransferError::Network(raw_log.to_string());
    }

    TransferError::Rejected {
        code: "TRANSFER_REJECTED".to_string(),
        message: format!("code {}: {}", code, raw_log),
    }
}

#[async_trait]
pub trait DestinationWriter: Send + Sync {
    /// Release `amount` of `token` to `destination`, tagged with `reference`.
    /// Returns the destination transaction hash once included.
    async fn transfer(
        &self,
        token: &str,
        destination: &str,
        amount: u128,
        reference: &str,
    ) -> Result<String, TransferError>;

    /// Hash of an earlier successful release for `reference`
    async fn find_transfer(&self, reference: &str) -> Result<Option<String>, TransferError>;
}

#[async_trait]
pub trait NonceSource: Send + Sync {
    /// The recipient's current redemption nonce on the vault
    async fn next_nonce(&self, recipient: &str) -> eyre::Result<u64>;
}
