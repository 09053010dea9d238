//! Message types for the bridge vault contract

use cosmwasm_schema::{cw_serde, QueryResponses};
use cosmwasm_std::{Addr, Binary, Timestamp, Uint128};

use crate::state::Role;

// ============================================================================
// Instantiate & Migrate
// ============================================================================

#[cw_serde]
pub struct MigrateMsg {}

#[cw_serde]
pub struct InstantiateMsg {
    /// Initial admin addresses (at least one)
    pub admins: Vec<String>,
    /// Initial operator addresses
    pub operators: Vec<String>,
    /// Compressed secp256k1 public key (33 bytes) of the claim authority
    pub claim_signer: Binary,
    /// Treasury address receiving flushed balances
    pub flush_address: String,
    /// Days of daily cap kept back on flush (default 2)
    pub reserve_days: Option<u64>,
    /// Seconds after activation before a token can be flushed (default 1 day)
    pub flush_grace_period: Option<u64>,
}

// ============================================================================
// Execute Messages
// ============================================================================

/// A signed authorization for `recipient` to withdraw `amount` of `token`.
#[cw_serde]
pub struct RedemptionClaim {
    pub recipient: String,
    pub token: String,
    pub amount: Uint128,
    pub nonce: u64,
    /// Unix seconds
    pub deadline: u64,
    /// Compact secp256k1 signature (r ‖ s, 64 bytes)
    pub signature: Binary,
}

#[cw_serde]
pub enum ExecuteMsg {
    // Allowance ledger
    AddTokenSupport {
        token: String,
        is_native: bool,
        daily_cap: Uint128,
        effective_at: Timestamp,
    },
    ChangeDailyCap {
        token: String,
        new_cap: Uint128,
        effective_at: Timestamp,
    },
    RemoveTokenSupport {
        token: String,
    },

    // Outflows
    /// Pay out a confirmed source-chain deposit. `reference` is the source
    /// transaction hash and can be released only once.
    Release {
        token: String,
        recipient: String,
        amount: Uint128,
        reference: String,
    },
    /// Redeem a signed claim. Funds always go to `claim.recipient`.
    Redeem {
        claim: RedemptionClaim,
    },
    /// Sweep balances above reserve to the flush address
    Flush {},

    // Configuration
    ChangeFlushAddress {
        address: String,
    },
    ChangeReserveDays {
        days: u64,
    },
    SetClaimSigner {
        public_key: Binary,
    },
    GrantRole {
        role: Role,
        address: String,
    },
    RevokeRole {
        role: Role,
        address: String,
    },
    Pause {},
    Unpause {},
}

// ============================================================================
// Query Messages
// ============================================================================

#[cw_serde]
#[derive(QueryResponses)]
pub enum QueryMsg {
    #[returns(ConfigResponse)]
    Config {},

    /// Allowance as of the current block (epoch rolled, read-only)
    #[returns(AllowanceResponse)]
    Allowance { token: String },

    #[returns(AllowancesResponse)]
    Allowances {
        start_after: Option<String>,
        limit: Option<u32>,
    },

    #[returns(NonceResponse)]
    Nonce { recipient: String },

    #[returns(VerifyClaimResponse)]
    VerifyClaim { claim: RedemptionClaim },

    #[returns(ReleaseResponse)]
    Released { reference: String },

    #[returns(RolesResponse)]
    Roles { address: String },

    #[returns(FlushResponse)]
    FlushPreview {},
}

// ============================================================================
// Query Responses
// ============================================================================

#[cw_serde]
pub struct ConfigResponse {
    pub paused: bool,
    pub claim_signer: Binary,
    pub flush_address: Addr,
    pub reserve_days: u64,
    pub flush_grace_period: u64,
}

#[cw_serde]
pub struct AllowanceResponse {
    pub token: String,
    pub is_native: bool,
    pub daily_cap: Uint128,
    pub current_usage: Uint128,
    pub remaining: Uint128,
    pub epoch_reset_at: Timestamp,
    pub in_change_allowance_period: bool,
    pub pending_daily_cap: Option<Uint128>,
    pub activated_at: Timestamp,
}

#[cw_serde]
pub struct AllowancesResponse {
    pub allowances: Vec<AllowanceResponse>,
}

#[cw_serde]
pub struct NonceResponse {
    pub recipient: Addr,
    pub nonce: u64,
}

#[cw_serde]
pub struct VerifyClaimResponse {
    pub valid: bool,
    /// Machine-readable rejection code when invalid
    pub error: Option<String>,
}

#[cw_serde]
pub struct ReleaseResponse {
    pub reference: String,
    pub released: bool,
    pub token: Option<String>,
    pub recipient: Option<Addr>,
    pub amount: Option<Uint128>,
    pub released_at: Option<Timestamp>,
}

#[cw_serde]
pub struct RolesResponse {
    pub address: Addr,
    pub roles: Vec<Role>,
}

#[cw_serde]
pub struct SweptToken {
    pub token: String,
    pub amount: Uint128,
}

/// Result of `Flush {}` (response data) and `FlushPreview {}`
#[cw_serde]
pub struct FlushResponse {
    pub flush_address: Addr,
    pub swept: Vec<SweptToken>,
}
