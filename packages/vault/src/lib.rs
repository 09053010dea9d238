//! Bridge Vault Contract - Allowance-Gated Custody
//!
//! Holds bridged liquidity on the destination chain and pays it out through
//! two paths, both charged against a per-token daily allowance:
//!
//! # Operator Release
//! 1. A deposit is confirmed on the source chain by the off-chain operator
//! 2. The operator calls `Release` with the source transaction hash as reference
//! 3. The vault charges the allowance, records the reference and pays out
//!
//! # Claim Redemption
//! 1. The claim authority signs a nonce-bound, time-bounded claim off-chain
//! 2. Anyone submits `Redeem { claim }`
//! 3. The vault verifies signature, nonce and deadline, charges the allowance,
//!    advances the nonce and pays the recipient
//!
//! # Reserve Flushing
//! Balances above `reserve_days` worth of daily cap are swept to the flush
//! address, skipping tokens in their activation grace window or a pending cap
//! change.

pub mod allowance;
pub mod asset;
pub mod claim;
pub mod contract;
pub mod error;
mod execute;
pub mod migration;
pub mod msg;
mod query;
pub mod roles;
pub mod state;

pub use crate::claim::{claim_digest, claim_struct_hash, domain_separator, keccak256};
pub use crate::error::ContractError;
pub use crate::msg::RedemptionClaim;
