//! Deposit payload decoding and token routing
//!
//! Two deposit shapes are accepted on the source chain:
//! - native value sent to the custody address, calldata = UTF-8 destination
//! - ERC-20 `transfer(custody, amount)` with the UTF-8 destination appended
//!   after the ABI-encoded arguments. The amount credited is what the token's
//!   `Transfer` logs moved into custody, not what the calldata asked for.

use std::collections::HashMap;

use alloy::primitives::{keccak256, Address, B256, U256};
use eyre::{eyre, Result, WrapErr};
use thiserror::Error;

use crate::source::SourceLog;
use crate::types::DepositPayload;

/// `transfer(address,uint256)`
pub const ERC20_TRANSFER_SELECTOR: [u8; 4] = [0xa9, 0x05, 0x9c, 0xbb];

/// Route key for the source chain's native coin
pub const NATIVE_TOKEN: &str = "native";

const ABI_WORD: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DepositError {
    #[error("INVALID_DEPOSIT_PAYLOAD: {0}")]
    InvalidPayload(String),

    #[error("TOKEN_NOT_SUPPORTED: no route for {0}")]
    UnroutedToken(String),
}

/// A decoded deposit in source-chain units
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deposit {
    /// `native` or the lowercased ERC-20 contract address
    pub source_token: String,
    pub amount: U256,
    pub destination: String,
}

/// keccak256("Transfer(address,address,uint256)")
pub fn transfer_event_signature() -> B256 {
    keccak256(b"Transfer(address,address,uint256)")
}

/// Total that `token` logged transferring into `custody`; `None` without a
/// matching `Transfer` event.
pub fn logged_custody_transfer(logs: &[SourceLog], token: &str, custody: &Address) -> Option<U256> {
    let token = token.parse::<Address>().ok()?;
    let signature = transfer_event_signature();

    logs.iter()
        .filter(|log| log.address.parse::<Address>().ok() == Some(token))
        .filter(|log| log.topics.len() == 3 && log.topics[0] == signature)
        .filter(|log| {
            let recipient = &log.topics[2];
            recipient[..12].iter().all(|b| *b == 0) && &recipient[12..] == custody.as_slice()
        })
        .filter(|log| log.data.len() == ABI_WORD)
        .map(|log| U256::from_be_slice(&log.data))
        .reduce(|total, amount| total.saturating_add(amount))
}

fn parse_address(raw: &str) -> Result<Address, DepositError> {
    raw.parse::<Address>()
        .map_err(|_| DepositError::InvalidPayload(format!("bad address {}", raw)))
}

/// Destination carried as trailing bytes; NUL padding and whitespace trimmed.
fn decode_destination(bytes: &[u8]) -> Result<String, DepositError> {
    let text = std::str::from_utf8(bytes)
        .map_err(|_| DepositError::InvalidPayload("destination is not UTF-8".to_string()))?;
    let destination = text.trim_matches(|c: char| c == '\0' || c.is_whitespace());
    if destination.is_empty() {
        return Err(DepositError::InvalidPayload(
            "missing destination address".to_string(),
        ));
    }
    Ok(destination.to_string())
}

/// Decode the persisted source transaction into a deposit to `custody`.
pub fn decode_deposit(payload: &DepositPayload, custody: &Address) -> Result<Deposit, DepositError> {
    let to = payload
        .to_address
        .as_deref()
        .ok_or_else(|| DepositError::InvalidPayload("contract creation".to_string()))?;
    let to = parse_address(to)?;

    let input = hex::decode(payload.input_data.trim_start_matches("0x"))
        .map_err(|_| DepositError::InvalidPayload("calldata is not hex".to_string()))?;

    let value: U256 = payload
        .value
        .parse()
        .map_err(|_| DepositError::InvalidPayload(format!("bad value {}", payload.value)))?;

    if input.len() >= 4 + 2 * ABI_WORD && input[..4] == ERC20_TRANSFER_SELECTOR {
        let recipient_word = &input[4..4 + ABI_WORD];
        if recipient_word[..12].iter().any(|b| *b != 0) {
            return Err(DepositError::InvalidPayload(
                "transfer recipient is not an address".to_string(),
            ));
        }
        let recipient = Address::from_slice(&recipient_word[12..]);
        if recipient != *custody {
            return Err(DepositError::InvalidPayload(format!(
                "transfer recipient {} is not the custody address",
                recipient
            )));
        }

        // A token may return false instead of reverting; only logged movement counts
        let logged = payload.custody_transfer.as_deref().ok_or_else(|| {
            DepositError::InvalidPayload("no Transfer into custody was logged".to_string())
        })?;
        let amount: U256 = logged
            .parse()
            .map_err(|_| DepositError::InvalidPayload(format!("bad logged amount {}", logged)))?;
        if amount.is_zero() {
            return Err(DepositError::InvalidPayload(
                "zero amount transferred into custody".to_string(),
            ));
        }
        let destination = decode_destination(&input[4 + 2 * ABI_WORD..])?;

        return Ok(Deposit {
            source_token: format!("{:#x}", to),
            amount,
            destination,
        });
    }

    if to != *custody {
        return Err(DepositError::InvalidPayload(format!(
            "transaction target {} is not the custody address",
            to
        )));
    }
    if value.is_zero() {
        return Err(DepositError::InvalidPayload("zero value deposit".to_string()));
    }

    Ok(Deposit {
        source_token: NATIVE_TOKEN.to_string(),
        amount: value,
        destination: decode_destination(&input)?,
    })
}

// ============================================================================
// Token Routes
// ============================================================================

/// Maps a source token to the vault token it is paid out in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRoute {
    pub vault_token: String,
    pub source_decimals: u8,
    pub vault_decimals: u8,
}

impl TokenRoute {
    /// Convert a source amount into vault units. Scaling down truncates;
    /// `None` when the result does not fit in u128.
    pub fn normalize(&self, amount: U256) -> Option<u128> {
        let scaled = if self.vault_decimals >= self.source_decimals {
            let factor = U256::from(10u8).checked_pow(U256::from(
                self.vault_decimals - self.source_decimals,
            ))?;
            amount.checked_mul(factor)?
        } else {
            let factor = U256::from(10u8).checked_pow(U256::from(
                self.source_decimals - self.vault_decimals,
            ))?;
            amount / factor
        };
        u128::try_from(scaled).ok()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenRoutes {
    routes: HashMap<String, TokenRoute>,
}

impl TokenRoutes {
    /// Parse `source=vault_token:source_decimals:vault_decimals`, comma separated.
    /// `source` is `native` or an ERC-20 address.
    pub fn parse(raw: &str) -> Result<Self> {
        let mut routes = HashMap::new();

        for entry in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let (source, target) = entry
                .split_once('=')
                .ok_or_else(|| eyre!("Token route '{}' is missing '='", entry))?;

            let parts: Vec<&str> = target.split(':').map(str::trim).collect();
            let [vault_token, source_decimals, vault_decimals] = parts.as_slice() else {
                return Err(eyre!(
                    "Token route '{}' must be source=token:source_decimals:vault_decimals",
                    entry
                ));
            };
            if vault_token.is_empty() {
                return Err(eyre!("Token route '{}' has an empty vault token", entry));
            }

            let source = source.trim();
            let key = if source.eq_ignore_ascii_case(NATIVE_TOKEN) {
                NATIVE_TOKEN.to_string()
            } else {
                let address = source
                    .parse::<Address>()
                    .map_err(|_| eyre!("Token route source '{}' is not an address", source))?;
                format!("{:#x}", address)
            };

            let route = TokenRoute {
                vault_token: vault_token.to_string(),
                source_decimals: source_decimals
                    .parse()
                    .wrap_err_with(|| format!("Invalid source decimals in '{}'", entry))?,
                vault_decimals: vault_decimals
                    .parse()
                    .wrap_err_with(|| format!("Invalid vault decimals in '{}'", entry))?,
            };

            if routes.insert(key.clone(), route).is_some() {
                return Err(eyre!("Duplicate token route for {}", key));
            }
        }

        Ok(Self { routes })
    }

    pub fn insert(&mut self, source: &str, route: TokenRoute) {
        self.routes.insert(source.to_lowercase(), route);
    }

    pub fn get(&self, source_token: &str) -> Result<&TokenRoute, DepositError> {
        self.routes
            .get(&source_token.to_lowercase())
            .ok_or_else(|| DepositError::UnroutedToken(source_token.to_string()))
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
