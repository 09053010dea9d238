//! Admin operations handlers.
//!
//! This module handles:
//! - Role membership (grant/revoke)
//! - Claim signer rotation
//! - Pause/unpause

use cosmwasm_std::{Binary, DepsMut, Response, StdResult};

use crate::error::ContractError;
use crate::roles::{grant, revoke};
use crate::state::{Role, CONFIG, COMPRESSED_PUBKEY_LEN};

/// Validate a compressed secp256k1 public key
pub fn validate_signer_key(public_key: &Binary) -> Result<(), ContractError> {
    if public_key.len() != COMPRESSED_PUBKEY_LEN {
        return Err(ContractError::InvalidSignerKey {
            reason: format!(
                "expected {} bytes, got {}",
                COMPRESSED_PUBKEY_LEN,
                public_key.len()
            ),
        });
    }
    if public_key[0] != 0x02 && public_key[0] != 0x03 {
        return Err(ContractError::InvalidSignerKey {
            reason: "not a compressed point".to_string(),
        });
    }
    Ok(())
}

// ============================================================================
// Roles
// ============================================================================

pub fn execute_grant_role(
    deps: DepsMut,
    role: Role,
    address: String,
) -> Result<Response, ContractError> {
    let member = deps.api.addr_validate(&address)?;
    let added = grant(deps.storage, role, &member)?;

    Ok(Response::new()
        .add_attribute("method", "grant_role")
        .add_attribute("role", role.as_str())
        .add_attribute("address", member)
        .add_attribute("changed", added.to_string()))
}

pub fn execute_revoke_role(
    deps: DepsMut,
    role: Role,
    address: String,
) -> Result<Response, ContractError> {
    let member = deps.api.addr_validate(&address)?;
    let removed = revoke(deps.storage, role, &member)?;

    Ok(Response::new()
        .add_attribute("method", "revoke_role")
        .add_attribute("role", role.as_str())
        .add_attribute("address", member)
        .add_attribute("changed", removed.to_string()))
}

// ============================================================================
// Claim Signer
// ============================================================================

/// Rotate the claim authority key. Outstanding claims signed by the old key
/// stop verifying.
pub fn execute_set_claim_signer(
    deps: DepsMut,
    public_key: Binary,
) -> Result<Response, ContractError> {
    validate_signer_key(&public_key)?;
    CONFIG.update(deps.storage, |mut config| -> StdResult<_> {
        config.claim_signer = public_key.clone();
        Ok(config)
    })?;

    Ok(Response::new()
        .add_attribute("method", "set_claim_signer")
        .add_attribute("claim_signer", hex::encode(public_key.as_slice())))
}

// ============================================================================
// Pause/Unpause
// ============================================================================

/// Pause the vault (stops releases, redemptions and flushes).
pub fn execute_pause(deps: DepsMut) -> Result<Response, ContractError> {
    CONFIG.update(deps.storage, |mut config| -> StdResult<_> {
        config.paused = true;
        Ok(config)
    })?;

    Ok(Response::new().add_attribute("method", "pause"))
}

pub fn execute_unpause(deps: DepsMut) -> Result<Response, ContractError> {
    CONFIG.update(deps.storage, |mut config| -> StdResult<_> {
        config.paused = false;
        Ok(config)
    })?;

    Ok(Response::new().add_attribute("method", "unpause"))
}
