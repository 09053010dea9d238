//! Error types for the bridge vault contract

use cosmwasm_std::{StdError, Timestamp, Uint128};
use thiserror::Error;

use crate::state::Role;

#[derive(Error, Debug, PartialEq)]
pub enum ContractError {
    #[error("{0}")]
    Std(#[from] StdError),

    // ========================================================================
    // Authorization Errors
    // ========================================================================

    #[error("Unauthorized: {role} role required")]
    Unauthorized { role: Role },

    #[error("Cannot revoke the last {role}")]
    LastRoleMember { role: Role },

    #[error("Vault is paused")]
    Paused,

    // ========================================================================
    // Allowance Errors
    // ========================================================================

    #[error("EXCEEDS_DAILY_ALLOWANCE: {token} requested {requested}, remaining {remaining}")]
    ExceedsDailyAllowance {
        token: String,
        requested: Uint128,
        remaining: Uint128,
    },

    #[error("TOKEN_NOT_SUPPORTED: {token}")]
    TokenNotSupported { token: String },

    #[error("STILL_IN_CHANGE_ALLOWANCE_PERIOD: {token} until {effective_at}")]
    StillInChangeAllowancePeriod {
        token: String,
        effective_at: Timestamp,
    },

    #[error("Token already supported: {token}")]
    TokenAlreadySupported { token: String },

    #[error("Effective time {effective_at} must be after {not_before}")]
    InvalidEffectiveTime {
        effective_at: Timestamp,
        not_before: Timestamp,
    },

    #[error("Token support still active: {token} has cap {daily_cap} and usage {current_usage}")]
    SupportStillActive {
        token: String,
        daily_cap: Uint128,
        current_usage: Uint128,
    },

    // ========================================================================
    // Claim Errors
    // ========================================================================

    #[error("FAKE_SIGNATURE")]
    FakeSignature,

    #[error("INCORRECT_NONCE: expected {expected}, got {got}")]
    IncorrectNonce { expected: u64, got: u64 },

    #[error("EXPIRED: deadline {deadline} passed at {now}")]
    Expired { deadline: u64, now: u64 },

    #[error("Invalid claim signer key: {reason}")]
    InvalidSignerKey { reason: String },

    // ========================================================================
    // Release & Flush Errors
    // ========================================================================

    #[error("Reference already released: {reference}")]
    ReferenceAlreadyReleased { reference: String },

    #[error("Invalid amount: {reason}")]
    InvalidAmount { reason: String },

    #[error("Invalid reserve days: {days} (max {max})")]
    InvalidReserveDays { days: u64, max: u64 },

    // ========================================================================
    // Migration Errors
    // ========================================================================

    #[error("Cannot migrate from {contract} {from} to {to}")]
    InvalidMigration {
        contract: String,
        from: String,
        to: String,
    },
}

impl ContractError {
    /// Machine-readable code for ledger and claim failures.
    pub fn code(&self) -> &'static str {
        match self {
            ContractError::ExceedsDailyAllowance { .. } => "EXCEEDS_DAILY_ALLOWANCE",
            ContractError::TokenNotSupported { .. } => "TOKEN_NOT_SUPPORTED",
            ContractError::StillInChangeAllowancePeriod { .. } => {
                "STILL_IN_CHANGE_ALLOWANCE_PERIOD"
            }
            ContractError::FakeSignature => "FAKE_SIGNATURE",
            ContractError::IncorrectNonce { .. } => "INCORRECT_NONCE",
            ContractError::Expired { .. } => "EXPIRED",
            ContractError::ReferenceAlreadyReleased { .. } => "REFERENCE_ALREADY_RELEASED",
            ContractError::Unauthorized { .. } => "UNAUTHORIZED",
            ContractError::Paused => "PAUSED",
            _ => "INVALID_REQUEST",
        }
    }
}
