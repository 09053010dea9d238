//! Reserve flushing tests.
//!
//! Balances above `reserve_days * daily_cap` leave for the flush address,
//! except for tokens still inside their activation grace window or a
//! pending cap change.

use cosmwasm_std::{coins, from_json, Addr, Empty, Timestamp, Uint128};
use cw20::{BalanceResponse, Cw20Coin, Cw20QueryMsg};
use cw_multi_test::{App, Contract, ContractWrapper, Executor};

use bridge_vault::msg::{ExecuteMsg, FlushResponse, InstantiateMsg, QueryMsg, SweptToken};
use bridge_vault::ContractError;

const DAY: u64 = 86_400;
const GRACE: u64 = 3_600;

// ============================================================================
// Test Setup
// ============================================================================

fn contract_vault() -> Box<dyn Contract<Empty>> {
    Box::new(ContractWrapper::new(
        bridge_vault::contract::execute,
        bridge_vault::contract::instantiate,
        bridge_vault::contract::query,
    ))
}

fn contract_cw20() -> Box<dyn Contract<Empty>> {
    Box::new(ContractWrapper::new(
        cw20_base::contract::execute,
        cw20_base::contract::instantiate,
        cw20_base::contract::query,
    ))
}

struct TestEnv {
    app: App,
    vault: Addr,
    cw20: Addr,
    admin: Addr,
    operator: Addr,
    treasury: Addr,
    /// Activation time of both tokens
    start: Timestamp,
}

fn setup() -> TestEnv {
    let mut app = App::default();
    let admin = Addr::unchecked("terra1admin");
    let operator = Addr::unchecked("terra1operator");
    let treasury = Addr::unchecked("terra1treasury");

    app.init_modules(|router, _, storage| {
        router
            .bank
            .init_balance(storage, &admin, coins(10_000_000, "uluna"))
            .unwrap();
    });

    let vault_code = app.store_code(contract_vault());
    let vault = app
        .instantiate_contract(
            vault_code,
            admin.clone(),
            &InstantiateMsg {
                admins: vec![admin.to_string()],
                operators: vec![operator.to_string()],
                claim_signer: vec![3u8; 33].into(),
                flush_address: treasury.to_string(),
                reserve_days: Some(2),
                flush_grace_period: Some(GRACE),
            },
            &[],
            "bridge-vault",
            Some(admin.to_string()),
        )
        .unwrap();

    let cw20_code = app.store_code(contract_cw20());
    let cw20 = app
        .instantiate_contract(
            cw20_code,
            admin.clone(),
            &cw20_base::msg::InstantiateMsg {
                name: "Wrapped Token".to_string(),
                symbol: "WTKN".to_string(),
                decimals: 6,
                initial_balances: vec![Cw20Coin {
                    address: vault.to_string(),
                    amount: Uint128::new(50_000),
                }],
                mint: None,
                marketing: None,
            },
            &[],
            "wtkn",
            None,
        )
        .unwrap();

    app.send_tokens(admin.clone(), vault.clone(), &coins(1_000_000, "uluna"))
        .unwrap();

    let start = app.block_info().time.plus_seconds(100);
    for (token, is_native, cap) in [
        ("uluna".to_string(), true, 100_000u128),
        (cw20.to_string(), false, 10_000u128),
    ] {
        app.execute_contract(
            admin.clone(),
            vault.clone(),
            &ExecuteMsg::AddTokenSupport {
                token,
                is_native,
                daily_cap: Uint128::new(cap),
                effective_at: start,
            },
            &[],
        )
        .unwrap();
    }

    TestEnv {
        app,
        vault,
        cw20,
        admin,
        operator,
        treasury,
        start,
    }
}

fn advance_to(env: &mut TestEnv, time: Timestamp) {
    env.app.update_block(|block| {
        block.time = time;
        block.height += 1;
    });
}

fn flush(env: &mut TestEnv) -> Result<FlushResponse, ContractError> {
    let operator = env.operator.clone();
    let vault = env.vault.clone();
    let response = env
        .app
        .execute_contract(operator, vault, &ExecuteMsg::Flush {}, &[])
        .map_err(|e| e.downcast::<ContractError>().unwrap())?;
    Ok(from_json(response.data.unwrap()).unwrap())
}

fn cw20_balance(env: &TestEnv, holder: &Addr) -> u128 {
    let response: BalanceResponse = env
        .app
        .wrap()
        .query_wasm_smart(
            &env.cw20,
            &Cw20QueryMsg::Balance {
                address: holder.to_string(),
            },
        )
        .unwrap();
    response.balance.u128()
}

fn native_balance(env: &TestEnv, holder: &Addr) -> u128 {
    env.app
        .wrap()
        .query_balance(holder, "uluna")
        .unwrap()
        .amount
        .u128()
}

// ============================================================================
// Tests
// ============================================================================

#[test]
fn test_flush_skips_tokens_in_activation_grace() {
    let mut env = setup();
    let start = env.start;

    // Not yet active
    assert!(flush(&mut env).unwrap().swept.is_empty());

    // Active but within the grace window
    advance_to(&mut env, start.plus_seconds(GRACE - 1));
    assert!(flush(&mut env).unwrap().swept.is_empty());
    assert_eq!(native_balance(&env, &env.treasury), 0);
}

#[test]
fn test_flush_sweeps_above_reserve() {
    let mut env = setup();
    let start = env.start;
    advance_to(&mut env, start.plus_seconds(GRACE));

    let preview: FlushResponse = env
        .app
        .wrap()
        .query_wasm_smart(&env.vault, &QueryMsg::FlushPreview {})
        .unwrap();

    let result = flush(&mut env).unwrap();
    assert_eq!(result, preview);

    // uluna: 1_000_000 - 2 * 100_000; cw20: 50_000 - 2 * 10_000
    let mut swept = result.swept.clone();
    swept.sort_by(|a, b| a.token.cmp(&b.token));
    let mut expected = vec![
        SweptToken {
            token: "uluna".to_string(),
            amount: Uint128::new(800_000),
        },
        SweptToken {
            token: env.cw20.to_string(),
            amount: Uint128::new(30_000),
        },
    ];
    expected.sort_by(|a, b| a.token.cmp(&b.token));
    assert_eq!(swept, expected);

    assert_eq!(native_balance(&env, &env.treasury), 800_000);
    assert_eq!(native_balance(&env, &env.vault), 200_000);
    assert_eq!(cw20_balance(&env, &env.treasury), 30_000);
    assert_eq!(cw20_balance(&env, &env.vault), 20_000);

    // Nothing left above reserve
    assert!(flush(&mut env).unwrap().swept.is_empty());
}

#[test]
fn test_flush_skips_token_with_pending_cap_change() {
    let mut env = setup();
    let start = env.start;
    advance_to(&mut env, start.plus_seconds(GRACE));

    let admin = env.admin.clone();
    let vault = env.vault.clone();
    env.app
        .execute_contract(
            admin,
            vault,
            &ExecuteMsg::ChangeDailyCap {
                token: "uluna".to_string(),
                new_cap: Uint128::new(1_000),
                effective_at: start.plus_seconds(2 * DAY),
            },
            &[],
        )
        .unwrap();

    let result = flush(&mut env).unwrap();
    assert_eq!(result.swept.len(), 1);
    assert_eq!(result.swept[0].token, env.cw20.to_string());
    assert_eq!(native_balance(&env, &env.vault), 1_000_000);

    // Once the change applies, the new cap sets the reserve
    advance_to(&mut env, start.plus_seconds(2 * DAY));
    let result = flush(&mut env).unwrap();
    assert_eq!(
        result.swept,
        vec![SweptToken {
            token: "uluna".to_string(),
            amount: Uint128::new(998_000),
        }]
    );
}

#[test]
fn test_flush_settings_apply_immediately() {
    let mut env = setup();
    let start = env.start;
    advance_to(&mut env, start.plus_seconds(GRACE));

    let admin = env.admin.clone();
    let vault = env.vault.clone();
    let new_treasury = Addr::unchecked("terra1newtreasury");
    env.app
        .execute_contract(
            admin.clone(),
            vault.clone(),
            &ExecuteMsg::ChangeFlushAddress {
                address: new_treasury.to_string(),
            },
            &[],
        )
        .unwrap();
    env.app
        .execute_contract(
            admin.clone(),
            vault.clone(),
            &ExecuteMsg::ChangeReserveDays { days: 5 },
            &[],
        )
        .unwrap();

    let result = flush(&mut env).unwrap();
    assert_eq!(result.flush_address, new_treasury);
    assert_eq!(native_balance(&env, &new_treasury), 500_000);
    assert_eq!(cw20_balance(&env, &new_treasury), 0);

    let err: ContractError = env
        .app
        .execute_contract(admin, vault, &ExecuteMsg::ChangeReserveDays { days: 366 }, &[])
        .unwrap_err()
        .downcast()
        .unwrap();
    assert!(matches!(err, ContractError::InvalidReserveDays { .. }));
}

#[test]
fn test_flush_requires_operator() {
    let mut env = setup();
    let admin = env.admin.clone();
    let vault = env.vault.clone();
    let err: ContractError = env
        .app
        .execute_contract(admin, vault, &ExecuteMsg::Flush {}, &[])
        .unwrap_err()
        .downcast()
        .unwrap();
    assert_eq!(err.code(), "UNAUTHORIZED");
}
