//! Token support and daily cap management handlers.

use cosmwasm_std::{DepsMut, Env, Response, Timestamp, Uint128};

use crate::allowance::{add_support, change_cap, remove_support};
use crate::error::ContractError;

/// Start supporting a token. Spending opens at `effective_at`.
pub fn execute_add_token_support(
    deps: DepsMut,
    env: Env,
    token: String,
    is_native: bool,
    daily_cap: Uint128,
    effective_at: Timestamp,
) -> Result<Response, ContractError> {
    if !is_native {
        deps.api.addr_validate(&token)?;
    }

    add_support(
        deps.storage,
        env.block.time,
        &token,
        is_native,
        daily_cap,
        effective_at,
    )?;

    Ok(Response::new()
        .add_attribute("method", "add_token_support")
        .add_attribute("token", token)
        .add_attribute("is_native", is_native.to_string())
        .add_attribute("daily_cap", daily_cap)
        .add_attribute("effective_at", effective_at.seconds().to_string()))
}

/// Schedule a new daily cap. Outflow of the token pauses until it applies.
pub fn execute_change_daily_cap(
    deps: DepsMut,
    env: Env,
    token: String,
    new_cap: Uint128,
    effective_at: Timestamp,
) -> Result<Response, ContractError> {
    let allowance = change_cap(deps.storage, env.block.time, &token, new_cap, effective_at)?;

    Ok(Response::new()
        .add_attribute("method", "change_daily_cap")
        .add_attribute("token", token)
        .add_attribute("current_cap", allowance.daily_cap)
        .add_attribute("new_cap", new_cap)
        .add_attribute("effective_at", effective_at.seconds().to_string()))
}

pub fn execute_remove_token_support(
    deps: DepsMut,
    env: Env,
    token: String,
) -> Result<Response, ContractError> {
    remove_support(deps.storage, env.block.time, &token)?;

    Ok(Response::new()
        .add_attribute("method", "remove_token_support")
        .add_attribute("token", token))
}
