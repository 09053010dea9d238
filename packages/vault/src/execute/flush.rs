//! Reserve flushing handlers.

use cosmwasm_std::{to_json_binary, Deps, DepsMut, Env, Order, Response, StdResult, Uint128};

use crate::asset::{balance_of, transfer_msg};
use crate::error::ContractError;
use crate::msg::{FlushResponse, SweptToken};
use crate::state::{Config, TokenAllowance, CONFIG, MAX_RESERVE_DAYS, TOKEN_ALLOWANCES};

struct Sweep {
    token: String,
    is_native: bool,
    amount: Uint128,
}

/// Whether a token is inside its activation grace window or a pending cap
/// change. Such tokens are skipped entirely.
fn in_grace(config: &Config, allowance: &TokenAllowance, env: &Env) -> bool {
    let now = env.block.time;
    allowance.in_change_period(now)
        || now < allowance.activated_at.plus_seconds(config.flush_grace_period)
}

fn compute_sweeps(deps: Deps, env: &Env, config: &Config) -> StdResult<Vec<Sweep>> {
    let allowances: Vec<(String, TokenAllowance)> = TOKEN_ALLOWANCES
        .range(deps.storage, None, None, Order::Ascending)
        .collect::<StdResult<_>>()?;

    let mut sweeps = Vec::new();
    for (token, allowance) in allowances {
        if in_grace(config, &allowance, env) {
            continue;
        }

        let effective = allowance.effective(env.block.time);
        let reserve = effective
            .daily_cap
            .checked_mul(config.reserve_days.into())
            .unwrap_or(Uint128::MAX);
        let balance = balance_of(&deps.querier, &token, allowance.is_native, &env.contract.address)?;
        let sweepable = balance.saturating_sub(reserve);

        if !sweepable.is_zero() {
            sweeps.push(Sweep {
                token,
                is_native: allowance.is_native,
                amount: sweepable,
            });
        }
    }
    Ok(sweeps)
}

fn to_response(config: &Config, sweeps: &[Sweep]) -> FlushResponse {
    FlushResponse {
        flush_address: config.flush_address.clone(),
        swept: sweeps
            .iter()
            .map(|s| SweptToken {
                token: s.token.clone(),
                amount: s.amount,
            })
            .collect(),
    }
}

/// Sweep every eligible token's balance above reserve to the flush address.
pub fn execute_flush(deps: DepsMut, env: Env) -> Result<Response, ContractError> {
    let config = CONFIG.load(deps.storage)?;
    if config.paused {
        return Err(ContractError::Paused);
    }

    let sweeps = compute_sweeps(deps.as_ref(), &env, &config)?;

    let mut response = Response::new()
        .add_attribute("method", "flush")
        .add_attribute("flush_address", config.flush_address.as_str())
        .add_attribute("swept_count", sweeps.len().to_string());
    for sweep in &sweeps {
        response = response
            .add_message(transfer_msg(
                &sweep.token,
                sweep.is_native,
                &config.flush_address,
                sweep.amount,
            )?)
            .add_attribute(format!("swept_{}", sweep.token), sweep.amount);
    }

    Ok(response.set_data(to_json_binary(&to_response(&config, &sweeps))?))
}

/// What `flush` would sweep right now
pub fn query_flush_preview(deps: Deps, env: Env) -> StdResult<FlushResponse> {
    let config = CONFIG.load(deps.storage)?;
    let sweeps = compute_sweeps(deps, &env, &config)?;
    Ok(to_response(&config, &sweeps))
}

pub fn execute_change_flush_address(
    deps: DepsMut,
    address: String,
) -> Result<Response, ContractError> {
    let flush_address = deps.api.addr_validate(&address)?;
    CONFIG.update(deps.storage, |mut config| -> StdResult<_> {
        config.flush_address = flush_address.clone();
        Ok(config)
    })?;

    Ok(Response::new()
        .add_attribute("method", "change_flush_address")
        .add_attribute("flush_address", flush_address))
}

pub fn execute_change_reserve_days(deps: DepsMut, days: u64) -> Result<Response, ContractError> {
    if days > MAX_RESERVE_DAYS {
        return Err(ContractError::InvalidReserveDays {
            days,
            max: MAX_RESERVE_DAYS,
        });
    }
    CONFIG.update(deps.storage, |mut config| -> StdResult<_> {
        config.reserve_days = days;
        Ok(config)
    })?;

    Ok(Response::new()
        .add_attribute("method", "change_reserve_days")
        .add_attribute("reserve_days", days.to_string()))
}
