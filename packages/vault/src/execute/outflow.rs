//! Outflow handlers: operator releases and claim redemption.
//!
//! Both paths charge the allowance ledger before any funds leave the vault.
//! Checks run before the first write, and the host transaction reverts every
//! write if a later step fails.

use cosmwasm_std::{DepsMut, Env, Response, Uint128};

use crate::allowance::try_spend;
use crate::asset::transfer_msg;
use crate::claim::{advance_nonce, verify_claim};
use crate::error::ContractError;
use crate::msg::RedemptionClaim;
use crate::state::{ReleaseRecord, CONFIG, RELEASES};

fn ensure_not_paused(deps: &DepsMut) -> Result<(), ContractError> {
    if CONFIG.load(deps.storage)?.paused {
        return Err(ContractError::Paused);
    }
    Ok(())
}

fn ensure_positive(amount: Uint128) -> Result<(), ContractError> {
    if amount.is_zero() {
        return Err(ContractError::InvalidAmount {
            reason: "amount must be greater than zero".to_string(),
        });
    }
    Ok(())
}

/// Release a confirmed source-chain deposit to `recipient`.
///
/// `reference` (the source transaction hash) is recorded so the same deposit
/// can never be paid twice, even if the operator retries after a crash.
pub fn execute_release(
    deps: DepsMut,
    env: Env,
    token: String,
    recipient: String,
    amount: Uint128,
    reference: String,
) -> Result<Response, ContractError> {
    ensure_not_paused(&deps)?;
    ensure_positive(amount)?;

    let reference = reference.to_lowercase();
    if RELEASES.has(deps.storage, &reference) {
        return Err(ContractError::ReferenceAlreadyReleased { reference });
    }
    let recipient = deps.api.addr_validate(&recipient)?;

    let allowance = try_spend(deps.storage, env.block.time, &token, amount)?;

    RELEASES.save(
        deps.storage,
        &reference,
        &ReleaseRecord {
            token: token.clone(),
            recipient: recipient.clone(),
            amount,
            released_at: env.block.time,
        },
    )?;

    let msg = transfer_msg(&token, allowance.is_native, &recipient, amount)?;

    Ok(Response::new()
        .add_message(msg)
        .add_attribute("method", "release")
        .add_attribute("release_reference", reference)
        .add_attribute("token", token)
        .add_attribute("recipient", recipient)
        .add_attribute("amount", amount)
        .add_attribute("usage", allowance.current_usage))
}

/// Redeem a signed claim: verify, charge the allowance, advance the nonce
/// and pay the recipient.
pub fn execute_redeem(
    deps: DepsMut,
    env: Env,
    claim: RedemptionClaim,
) -> Result<Response, ContractError> {
    ensure_not_paused(&deps)?;
    ensure_positive(claim.amount)?;

    let config = CONFIG.load(deps.storage)?;
    let recipient = verify_claim(
        deps.storage,
        deps.api,
        &env,
        config.claim_signer.as_slice(),
        &claim,
    )?;

    let allowance = try_spend(deps.storage, env.block.time, &claim.token, claim.amount)?;
    let next_nonce = advance_nonce(deps.storage, &recipient)?;

    let msg = transfer_msg(&claim.token, allowance.is_native, &recipient, claim.amount)?;

    Ok(Response::new()
        .add_message(msg)
        .add_attribute("method", "redeem")
        .add_attribute("recipient", recipient)
        .add_attribute("token", claim.token)
        .add_attribute("amount", claim.amount)
        .add_attribute("nonce", claim.nonce.to_string())
        .add_attribute("next_nonce", next_nonce.to_string()))
}
