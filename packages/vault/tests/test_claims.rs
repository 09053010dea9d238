//! Signed claim redemption tests.
//!
//! Claims are signed here the same way the claim authority signs them:
//! secp256k1 over the domain-separated claim digest.

use cosmwasm_std::{coins, Addr, Binary, Timestamp, Uint128};
use cw_multi_test::{App, ContractWrapper, Executor};
use k256::ecdsa::{signature::hazmat::PrehashSigner, Signature, SigningKey};

use bridge_vault::msg::{
    AllowanceResponse, ExecuteMsg, InstantiateMsg, NonceResponse, QueryMsg, RedemptionClaim,
    VerifyClaimResponse,
};
use bridge_vault::ContractError;

const DAY: u64 = 86_400;

// ============================================================================
// Test Setup
// ============================================================================

fn contract_vault() -> Box<dyn cw_multi_test::Contract<cosmwasm_std::Empty>> {
    let contract = ContractWrapper::new(
        bridge_vault::contract::execute,
        bridge_vault::contract::instantiate,
        bridge_vault::contract::query,
    );
    Box::new(contract)
}

struct TestEnv {
    app: App,
    vault: Addr,
    admin: Addr,
    user: Addr,
    relayer: Addr,
    signer: SigningKey,
}

fn signer_key() -> SigningKey {
    SigningKey::from_slice(&[0x42u8; 32]).unwrap()
}

fn public_key(key: &SigningKey) -> Binary {
    Binary::from(key.verifying_key().to_encoded_point(true).as_bytes())
}

fn setup() -> TestEnv {
    let mut app = App::default();
    let admin = Addr::unchecked("terra1admin");
    let operator = Addr::unchecked("terra1operator");
    let user = Addr::unchecked("terra1user");
    let relayer = Addr::unchecked("terra1relayer");
    let signer = signer_key();

    app.init_modules(|router, _, storage| {
        router
            .bank
            .init_balance(storage, &admin, coins(10_000_000_000, "uluna"))
            .unwrap();
    });

    let code_id = app.store_code(contract_vault());
    let vault = app
        .instantiate_contract(
            code_id,
            admin.clone(),
            &InstantiateMsg {
                admins: vec![admin.to_string()],
                operators: vec![operator.to_string()],
                claim_signer: public_key(&signer),
                flush_address: "terra1treasury".to_string(),
                reserve_days: None,
                flush_grace_period: None,
            },
            &[],
            "bridge-vault",
            Some(admin.to_string()),
        )
        .unwrap();

    app.send_tokens(admin.clone(), vault.clone(), &coins(1_000_000, "uluna"))
        .unwrap();

    let effective_at = app.block_info().time.plus_seconds(10);
    app.execute_contract(
        admin.clone(),
        vault.clone(),
        &ExecuteMsg::AddTokenSupport {
            token: "uluna".to_string(),
            is_native: true,
            daily_cap: Uint128::new(10_000),
            effective_at,
        },
        &[],
    )
    .unwrap();
    app.update_block(|block| {
        block.time = effective_at;
        block.height += 1;
    });

    TestEnv {
        app,
        vault,
        admin,
        user,
        relayer,
        signer,
    }
}

fn now(env: &TestEnv) -> Timestamp {
    env.app.block_info().time
}

fn sign_claim(
    env: &TestEnv,
    key: &SigningKey,
    amount: u128,
    nonce: u64,
    deadline: u64,
) -> RedemptionClaim {
    let mut claim = RedemptionClaim {
        recipient: env.user.to_string(),
        token: "uluna".to_string(),
        amount: Uint128::new(amount),
        nonce,
        deadline,
        signature: Binary::default(),
    };
    let digest = claim.digest(&env.app.block_info().chain_id, env.vault.as_str());
    let signature: Signature = key.sign_prehash(&digest).unwrap();
    claim.signature = Binary::from(signature.to_bytes().as_slice());
    claim
}

fn redeem(env: &mut TestEnv, claim: &RedemptionClaim) -> Result<(), ContractError> {
    let relayer = env.relayer.clone();
    let vault = env.vault.clone();
    env.app
        .execute_contract(
            relayer,
            vault,
            &ExecuteMsg::Redeem {
                claim: claim.clone(),
            },
            &[],
        )
        .map(|_| ())
        .map_err(|e| e.downcast().unwrap())
}

fn nonce(env: &TestEnv) -> u64 {
    let response: NonceResponse = env
        .app
        .wrap()
        .query_wasm_smart(
            &env.vault,
            &QueryMsg::Nonce {
                recipient: env.user.to_string(),
            },
        )
        .unwrap();
    response.nonce
}

fn user_balance(env: &TestEnv) -> u128 {
    env.app
        .wrap()
        .query_balance(&env.user, "uluna")
        .unwrap()
        .amount
        .u128()
}

// ============================================================================
// Tests
// ============================================================================

#[test]
fn test_redeem_pays_recipient_and_advances_nonce() {
    let mut env = setup();
    let deadline = now(&env).seconds() + DAY;
    let key = env.signer.clone();
    let claim = sign_claim(&env, &key, 2_500, 0, deadline);

    // Submitted by a third party; funds still go to the recipient
    redeem(&mut env, &claim).unwrap();

    assert_eq!(user_balance(&env), 2_500);
    assert_eq!(nonce(&env), 1);

    let allowance: AllowanceResponse = env
        .app
        .wrap()
        .query_wasm_smart(
            &env.vault,
            &QueryMsg::Allowance {
                token: "uluna".to_string(),
            },
        )
        .unwrap();
    assert_eq!(allowance.current_usage, Uint128::new(2_500));
}

#[test]
fn test_replayed_claim_rejected() {
    let mut env = setup();
    let deadline = now(&env).seconds() + DAY;
    let key = env.signer.clone();
    let claim = sign_claim(&env, &key, 100, 0, deadline);

    redeem(&mut env, &claim).unwrap();
    let err = redeem(&mut env, &claim).unwrap_err();
    assert_eq!(err, ContractError::IncorrectNonce { expected: 1, got: 0 });
    assert_eq!(user_balance(&env), 100);
}

#[test]
fn test_nonce_must_match_exactly() {
    let mut env = setup();
    let deadline = now(&env).seconds() + DAY;
    let key = env.signer.clone();

    // A future nonce is not "any unused nonce"
    let ahead = sign_claim(&env, &key, 100, 1, deadline);
    let err = redeem(&mut env, &ahead).unwrap_err();
    assert_eq!(err, ContractError::IncorrectNonce { expected: 0, got: 1 });

    let first = sign_claim(&env, &key, 100, 0, deadline);
    redeem(&mut env, &first).unwrap();
    redeem(&mut env, &ahead).unwrap();
    assert_eq!(nonce(&env), 2);
}

#[test]
fn test_fake_signature_rejected() {
    let mut env = setup();
    let deadline = now(&env).seconds() + DAY;
    let intruder = SigningKey::from_slice(&[0x07u8; 32]).unwrap();
    let forged = sign_claim(&env, &intruder, 100, 0, deadline);

    assert_eq!(
        redeem(&mut env, &forged).unwrap_err(),
        ContractError::FakeSignature
    );

    // Tampering with a signed field breaks the signature
    let key = env.signer.clone();
    let mut tampered = sign_claim(&env, &key, 100, 0, deadline);
    tampered.amount = Uint128::new(100_000);
    assert_eq!(
        redeem(&mut env, &tampered).unwrap_err(),
        ContractError::FakeSignature
    );
    assert_eq!(nonce(&env), 0);
}

#[test]
fn test_expired_claim_rejected() {
    let mut env = setup();
    let deadline = now(&env).seconds() + 60;
    let key = env.signer.clone();
    let claim = sign_claim(&env, &key, 100, 0, deadline);

    env.app.update_block(|block| {
        block.time = block.time.plus_seconds(61);
        block.height += 1;
    });

    let err = redeem(&mut env, &claim).unwrap_err();
    assert!(matches!(err, ContractError::Expired { .. }));
    assert_eq!(user_balance(&env), 0);
}

#[test]
fn test_claim_over_allowance_leaves_nonce_untouched() {
    let mut env = setup();
    let deadline = now(&env).seconds() + DAY;
    let key = env.signer.clone();
    let claim = sign_claim(&env, &key, 10_001, 0, deadline);

    let err = redeem(&mut env, &claim).unwrap_err();
    assert_eq!(err.code(), "EXCEEDS_DAILY_ALLOWANCE");
    assert_eq!(nonce(&env), 0);
    assert_eq!(user_balance(&env), 0);
}

#[test]
fn test_claim_for_unsupported_token() {
    let mut env = setup();
    let deadline = now(&env).seconds() + DAY;
    let key = env.signer.clone();
    let mut claim = RedemptionClaim {
        recipient: env.user.to_string(),
        token: "uusd".to_string(),
        amount: Uint128::new(5),
        nonce: 0,
        deadline,
        signature: Binary::default(),
    };
    let digest = claim.digest(&env.app.block_info().chain_id, env.vault.as_str());
    let signature: Signature = key.sign_prehash(&digest).unwrap();
    claim.signature = Binary::from(signature.to_bytes().as_slice());

    let err = redeem(&mut env, &claim).unwrap_err();
    assert_eq!(err.code(), "TOKEN_NOT_SUPPORTED");
}

#[test]
fn test_verify_claim_query() {
    let mut env = setup();
    let deadline = now(&env).seconds() + DAY;
    let key = env.signer.clone();
    let claim = sign_claim(&env, &key, 100, 0, deadline);

    let response: VerifyClaimResponse = env
        .app
        .wrap()
        .query_wasm_smart(
            &env.vault,
            &QueryMsg::VerifyClaim {
                claim: claim.clone(),
            },
        )
        .unwrap();
    assert!(response.valid);

    redeem(&mut env, &claim).unwrap();
    let response: VerifyClaimResponse = env
        .app
        .wrap()
        .query_wasm_smart(&env.vault, &QueryMsg::VerifyClaim { claim })
        .unwrap();
    assert!(!response.valid);
    assert_eq!(response.error.as_deref(), Some("INCORRECT_NONCE"));
}

#[test]
fn test_rotated_signer_invalidates_old_claims() {
    let mut env = setup();
    let deadline = now(&env).seconds() + DAY;
    let old_key = env.signer.clone();
    let claim = sign_claim(&env, &old_key, 100, 0, deadline);

    let new_key = SigningKey::from_slice(&[0x11u8; 32]).unwrap();
    let admin = env.admin.clone();
    let vault = env.vault.clone();
    env.app
        .execute_contract(
            admin,
            vault,
            &ExecuteMsg::SetClaimSigner {
                public_key: public_key(&new_key),
            },
            &[],
        )
        .unwrap();

    assert_eq!(
        redeem(&mut env, &claim).unwrap_err(),
        ContractError::FakeSignature
    );
    let reissued = sign_claim(&env, &new_key, 100, 0, deadline);
    redeem(&mut env, &reissued).unwrap();
}

#[test]
fn test_redeem_blocked_while_paused() {
    let mut env = setup();
    let deadline = now(&env).seconds() + DAY;
    let key = env.signer.clone();
    let claim = sign_claim(&env, &key, 100, 0, deadline);

    let admin = env.admin.clone();
    let vault = env.vault.clone();
    env.app
        .execute_contract(admin, vault, &ExecuteMsg::Pause {}, &[])
        .unwrap();

    assert_eq!(redeem(&mut env, &claim).unwrap_err(), ContractError::Paused);
}
