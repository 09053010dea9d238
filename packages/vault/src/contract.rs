//! Bridge Vault Contract - Entry Points
//!
//! The implementation is modularized into:
//! - `execute/` - Execute message handlers
//! - `query` - Query message handlers
//! - `roles` - Command to role mapping, checked before dispatch

use cosmwasm_std::{
    entry_point, to_json_binary, Binary, Deps, DepsMut, Env, MessageInfo, Response, StdError,
    StdResult,
};
use cw2::set_contract_version;

use crate::error::ContractError;
use crate::execute::{
    execute_add_token_support, execute_change_daily_cap, execute_change_flush_address,
    execute_change_reserve_days, execute_flush, execute_grant_role, execute_pause,
    execute_redeem, execute_release, execute_remove_token_support, execute_revoke_role,
    execute_set_claim_signer, execute_unpause, query_flush_preview, validate_signer_key,
};
use crate::migration::run_migrations;
use crate::msg::{ExecuteMsg, InstantiateMsg, MigrateMsg, QueryMsg};
use crate::query::{
    query_allowance, query_allowances, query_config, query_nonce, query_released, query_roles,
    query_verify_claim,
};
use crate::roles::{authorize, grant};
use crate::state::{
    Config, Role, CONFIG, CONTRACT_NAME, CONTRACT_VERSION, DEFAULT_FLUSH_GRACE_PERIOD,
    DEFAULT_RESERVE_DAYS, MAX_RESERVE_DAYS,
};

// ============================================================================
// Instantiate
// ============================================================================

#[cfg_attr(not(feature = "library"), entry_point)]
pub fn instantiate(
    deps: DepsMut,
    _env: Env,
    _info: MessageInfo,
    msg: InstantiateMsg,
) -> Result<Response, ContractError> {
    set_contract_version(deps.storage, CONTRACT_NAME, CONTRACT_VERSION)?;

    if msg.admins.is_empty() {
        return Err(ContractError::Std(StdError::generic_err(
            "At least one admin required",
        )));
    }
    validate_signer_key(&msg.claim_signer)?;

    let reserve_days = msg.reserve_days.unwrap_or(DEFAULT_RESERVE_DAYS);
    if reserve_days > MAX_RESERVE_DAYS {
        return Err(ContractError::InvalidReserveDays {
            days: reserve_days,
            max: MAX_RESERVE_DAYS,
        });
    }

    let config = Config {
        paused: false,
        claim_signer: msg.claim_signer,
        flush_address: deps.api.addr_validate(&msg.flush_address)?,
        reserve_days,
        flush_grace_period: msg.flush_grace_period.unwrap_or(DEFAULT_FLUSH_GRACE_PERIOD),
    };
    CONFIG.save(deps.storage, &config)?;

    for admin in &msg.admins {
        let admin = deps.api.addr_validate(admin)?;
        grant(deps.storage, Role::Admin, &admin)?;
    }
    for operator in &msg.operators {
        let operator = deps.api.addr_validate(operator)?;
        grant(deps.storage, Role::Operator, &operator)?;
    }

    Ok(Response::new()
        .add_attribute("method", "instantiate")
        .add_attribute("admin_count", msg.admins.len().to_string())
        .add_attribute("operator_count", msg.operators.len().to_string())
        .add_attribute("flush_address", config.flush_address)
        .add_attribute("reserve_days", reserve_days.to_string()))
}

// ============================================================================
// Execute
// ============================================================================

#[cfg_attr(not(feature = "library"), entry_point)]
pub fn execute(
    deps: DepsMut,
    env: Env,
    info: MessageInfo,
    msg: ExecuteMsg,
) -> Result<Response, ContractError> {
    authorize(deps.storage, &info.sender, &msg)?;

    match msg {
        // Allowance ledger
        ExecuteMsg::AddTokenSupport {
            token,
            is_native,
            daily_cap,
            effective_at,
        } => execute_add_token_support(deps, env, token, is_native, daily_cap, effective_at),
        ExecuteMsg::ChangeDailyCap {
            token,
            new_cap,
            effective_at,
        } => execute_change_daily_cap(deps, env, token, new_cap, effective_at),
        ExecuteMsg::RemoveTokenSupport { token } => execute_remove_token_support(deps, env, token),

        // Outflows
        ExecuteMsg::Release {
            token,
            recipient,
            amount,
            reference,
        } => execute_release(deps, env, token, recipient, amount, reference),
        ExecuteMsg::Redeem { claim } => execute_redeem(deps, env, claim),
        ExecuteMsg::Flush {} => execute_flush(deps, env),

        // Configuration
        ExecuteMsg::ChangeFlushAddress { address } => execute_change_flush_address(deps, address),
        ExecuteMsg::ChangeReserveDays { days } => execute_change_reserve_days(deps, days),
        ExecuteMsg::SetClaimSigner { public_key } => execute_set_claim_signer(deps, public_key),
        ExecuteMsg::GrantRole { role, address } => execute_grant_role(deps, role, address),
        ExecuteMsg::RevokeRole { role, address } => execute_revoke_role(deps, role, address),
        ExecuteMsg::Pause {} => execute_pause(deps),
        ExecuteMsg::Unpause {} => execute_unpause(deps),
    }
}

// ============================================================================
// Query
// ============================================================================

#[cfg_attr(not(feature = "library"), entry_point)]
pub fn query(deps: Deps, env: Env, msg: QueryMsg) -> StdResult<Binary> {
    match msg {
        QueryMsg::Config {} => to_json_binary(&query_config(deps)?),
        QueryMsg::Allowance { token } => to_json_binary(&query_allowance(deps, env, token)?),
        QueryMsg::Allowances { start_after, limit } => {
            to_json_binary(&query_allowances(deps, env, start_after, limit)?)
        }
        QueryMsg::Nonce { recipient } => to_json_binary(&query_nonce(deps, recipient)?),
        QueryMsg::VerifyClaim { claim } => to_json_binary(&query_verify_claim(deps, env, claim)?),
        QueryMsg::Released { reference } => to_json_binary(&query_released(deps, reference)?),
        QueryMsg::Roles { address } => to_json_binary(&query_roles(deps, address)?),
        QueryMsg::FlushPreview {} => to_json_binary(&query_flush_preview(deps, env)?),
    }
}

// ============================================================================
// Migrate
// ============================================================================

#[cfg_attr(not(feature = "library"), entry_point)]
pub fn migrate(deps: DepsMut, _env: Env, _msg: MigrateMsg) -> Result<Response, ContractError> {
    let (from, migrated) = run_migrations(deps.storage, deps.api)?;

    Ok(Response::new()
        .add_attribute("action", "migrate")
        .add_attribute("from_version", from)
        .add_attribute("version", CONTRACT_VERSION)
        .add_attribute("migrated_allowances", migrated.to_string()))
}
