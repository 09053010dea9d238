//! Native and CW20 asset movement

use cosmwasm_std::{
    to_json_binary, Addr, BankMsg, Coin, CosmosMsg, QuerierWrapper, StdResult, Uint128, WasmMsg,
};
use cw20::{BalanceResponse, Cw20ExecuteMsg, Cw20QueryMsg};

/// Message sending `amount` of `token` from the vault to `recipient`
pub fn transfer_msg(
    token: &str,
    is_native: bool,
    recipient: &Addr,
    amount: Uint128,
) -> StdResult<CosmosMsg> {
    if is_native {
        Ok(CosmosMsg::Bank(BankMsg::Send {
            to_address: recipient.to_string(),
            amount: vec![Coin {
                denom: token.to_string(),
                amount,
            }],
        }))
    } else {
        Ok(CosmosMsg::Wasm(WasmMsg::Execute {
            contract_addr: token.to_string(),
            msg: to_json_binary(&Cw20ExecuteMsg::Transfer {
                recipient: recipient.to_string(),
                amount,
            })?,
            funds: vec![],
        }))
    }
}

/// Balance of `token` held by `holder`
pub fn balance_of(
    querier: &QuerierWrapper,
    token: &str,
    is_native: bool,
    holder: &Addr,
) -> StdResult<Uint128> {
    if is_native {
        Ok(querier.query_balance(holder, token)?.amount)
    } else {
        let response: BalanceResponse = querier.query_wasm_smart(
            token,
            &Cw20QueryMsg::Balance {
                address: holder.to_string(),
            },
        )?;
        Ok(response.balance)
    }
}
