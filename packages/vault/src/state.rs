//! State definitions for the bridge vault contract
//!
//! Storage is versioned through cw2. Fields are only ever appended to stored
//! structs; older layouts are rewritten by `migrate` (see `migration.rs`)
//! before any handler reads them.

use cosmwasm_schema::cw_serde;
use cosmwasm_std::{Addr, Binary, Timestamp, Uint128};
use cw_storage_plus::{Item, Map};

// ============================================================================
// Constants
// ============================================================================

pub const CONTRACT_NAME: &str = "crates.io:bridge-vault";
pub const CONTRACT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Length of one allowance epoch (24 hours)
pub const EPOCH_LENGTH: u64 = 86_400;

/// Default number of days of daily cap kept back from flushes
pub const DEFAULT_RESERVE_DAYS: u64 = 2;

/// Default grace window after a token activates before it can be flushed
pub const DEFAULT_FLUSH_GRACE_PERIOD: u64 = 86_400;

/// Upper bound for the reserve multiplier
pub const MAX_RESERVE_DAYS: u64 = 365;

/// Length of a compressed secp256k1 public key
pub const COMPRESSED_PUBKEY_LEN: usize = 33;

// ============================================================================
// Config
// ============================================================================

#[cw_serde]
pub struct Config {
    /// Whether releases, redemptions and flushes are halted
    pub paused: bool,
    /// Compressed secp256k1 key of the claim-issuing authority
    pub claim_signer: Binary,
    /// Treasury address receiving flushed balances
    pub flush_address: Addr,
    /// Days of daily cap kept in the vault on flush
    pub reserve_days: u64,
    /// Seconds after activation before a token becomes flushable
    pub flush_grace_period: u64,
}

pub const CONFIG: Item<Config> = Item::new("config");

// ============================================================================
// Roles
// ============================================================================

/// Privileged roles. Every mutating command is checked against one of these.
#[cw_serde]
#[derive(Copy, Eq, PartialOrd, Ord)]
pub enum Role {
    /// Governs tokens, caps, flush settings, signer and role membership
    Admin,
    /// Executes releases and flushes
    Operator,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Operator => "operator",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role membership: (role, address) -> granted
pub const ROLE_MEMBERS: Map<(&str, &Addr), bool> = Map::new("role_members");

/// Number of members per role
pub const ROLE_COUNTS: Map<&str, u32> = Map::new("role_counts");

// ============================================================================
// Allowance Ledger
// ============================================================================

/// Per-token daily outflow allowance.
///
/// `epoch_reset_at` is the next reset boundary. While
/// `in_change_allowance_period` is set and the boundary has not been reached,
/// outflow of the token is refused.
#[cw_serde]
pub struct TokenAllowance {
    pub daily_cap: Uint128,
    pub current_usage: Uint128,
    pub epoch_reset_at: Timestamp,
    pub in_change_allowance_period: bool,
    /// Native denom (bank) or CW20 contract
    pub is_native: bool,
    /// Cap taking over at `epoch_reset_at` when a change is pending
    pub pending_daily_cap: Option<Uint128>,
    /// Effective time given when support was added
    pub activated_at: Timestamp,
}

/// Token id (denom or CW20 address) -> allowance
pub const TOKEN_ALLOWANCES: Map<&str, TokenAllowance> = Map::new("token_allowances");

// ============================================================================
// Claims & Releases
// ============================================================================

/// Next expected claim nonce per recipient
pub const NONCES: Map<&Addr, u64> = Map::new("claim_nonces");

/// Operator release, keyed by the source-chain reference it settles
#[cw_serde]
pub struct ReleaseRecord {
    pub token: String,
    pub recipient: Addr,
    pub amount: Uint128,
    pub released_at: Timestamp,
}

pub const RELEASES: Map<&str, ReleaseRecord> = Map::new("releases");
