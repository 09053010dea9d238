//! Query handlers for the bridge vault contract.

use cosmwasm_std::{Deps, Env, StdError, StdResult};

use crate::allowance::{list_allowances, load_allowance};
use crate::claim::{current_nonce, verify_claim};
use crate::error::ContractError;
use crate::msg::{
    AllowanceResponse, AllowancesResponse, ConfigResponse, NonceResponse, RedemptionClaim,
    ReleaseResponse, RolesResponse, VerifyClaimResponse,
};
use crate::roles::roles_of;
use crate::state::{TokenAllowance, CONFIG, RELEASES};

const DEFAULT_LIMIT: u32 = 10;
const MAX_LIMIT: u32 = 100;

pub fn query_config(deps: Deps) -> StdResult<ConfigResponse> {
    let config = CONFIG.load(deps.storage)?;
    Ok(ConfigResponse {
        paused: config.paused,
        claim_signer: config.claim_signer,
        flush_address: config.flush_address,
        reserve_days: config.reserve_days,
        flush_grace_period: config.flush_grace_period,
    })
}

fn allowance_response(token: String, allowance: TokenAllowance) -> AllowanceResponse {
    AllowanceResponse {
        token,
        is_native: allowance.is_native,
        daily_cap: allowance.daily_cap,
        current_usage: allowance.current_usage,
        remaining: allowance.remaining(),
        epoch_reset_at: allowance.epoch_reset_at,
        in_change_allowance_period: allowance.in_change_allowance_period,
        pending_daily_cap: allowance.pending_daily_cap,
        activated_at: allowance.activated_at,
    }
}

/// Allowance as the next spend would see it.
pub fn query_allowance(deps: Deps, env: Env, token: String) -> StdResult<AllowanceResponse> {
    let allowance = load_allowance(deps.storage, &token)
        .map_err(|e| StdError::not_found(e.to_string()))?
        .effective(env.block.time);
    Ok(allowance_response(token, allowance))
}

pub fn query_allowances(
    deps: Deps,
    env: Env,
    start_after: Option<String>,
    limit: Option<u32>,
) -> StdResult<AllowancesResponse> {
    let limit = limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT) as usize;
    let allowances = list_allowances(deps.storage, start_after.as_deref(), limit)?
        .into_iter()
        .map(|(token, allowance)| allowance_response(token, allowance.effective(env.block.time)))
        .collect();
    Ok(AllowancesResponse { allowances })
}

pub fn query_nonce(deps: Deps, recipient: String) -> StdResult<NonceResponse> {
    let recipient = deps.api.addr_validate(&recipient)?;
    let nonce = current_nonce(deps.storage, &recipient)?;
    Ok(NonceResponse { recipient, nonce })
}

/// Dry-run claim verification.
pub fn query_verify_claim(
    deps: Deps,
    env: Env,
    claim: RedemptionClaim,
) -> StdResult<VerifyClaimResponse> {
    let config = CONFIG.load(deps.storage)?;
    match verify_claim(
        deps.storage,
        deps.api,
        &env,
        config.claim_signer.as_slice(),
        &claim,
    ) {
        Ok(_) => Ok(VerifyClaimResponse {
            valid: true,
            error: None,
        }),
        Err(ContractError::Std(err)) => Err(err),
        Err(e) => Ok(VerifyClaimResponse {
            valid: false,
            error: Some(e.code().to_string()),
        }),
    }
}

pub fn query_released(deps: Deps, reference: String) -> StdResult<ReleaseResponse> {
    let reference = reference.to_lowercase();
    let record = RELEASES.may_load(deps.storage, &reference)?;
    Ok(ReleaseResponse {
        released: record.is_some(),
        token: record.as_ref().map(|r| r.token.clone()),
        recipient: record.as_ref().map(|r| r.recipient.clone()),
        amount: record.as_ref().map(|r| r.amount),
        released_at: record.map(|r| r.released_at),
        reference,
    })
}

pub fn query_roles(deps: Deps, address: String) -> StdResult<RolesResponse> {
    let address = deps.api.addr_validate(&address)?;
    let roles = roles_of(deps.storage, &address)?;
    Ok(RolesResponse { address, roles })
}
