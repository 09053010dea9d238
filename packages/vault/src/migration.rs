//! Storage migrations.
//!
//! Each step rewrites records from an older layout into the current one.
//! `migrate` runs every step newer than the stored cw2 version before the
//! new code touches those records.

use cosmwasm_schema::cw_serde;
use cosmwasm_std::{Addr, Api, Binary, Order, StdError, StdResult, Storage, Timestamp, Uint128};
use cw_storage_plus::{Item, Map};

use crate::error::ContractError;
use crate::state::{
    Config, TokenAllowance, CONFIG, CONTRACT_NAME, CONTRACT_VERSION, DEFAULT_FLUSH_GRACE_PERIOD,
    TOKEN_ALLOWANCES,
};

// ============================================================================
// 0.1.x layout
// ============================================================================

#[cw_serde]
pub struct LegacyConfig {
    pub paused: bool,
    pub claim_signer: Binary,
    pub flush_address: Addr,
    pub reserve_days: u64,
}

#[cw_serde]
pub struct LegacyTokenAllowance {
    pub daily_cap: Uint128,
    pub current_usage: Uint128,
    pub epoch_reset_at: Timestamp,
    pub in_change_allowance_period: bool,
}

pub const LEGACY_CONFIG: Item<LegacyConfig> = Item::new("config");
pub const LEGACY_TOKEN_ALLOWANCES: Map<&str, LegacyTokenAllowance> =
    Map::new("token_allowances");

/// Parse `major.minor.patch`, ignoring pre-release suffixes
pub fn parse_version(version: &str) -> StdResult<(u64, u64, u64)> {
    let core = version.split(['-', '+']).next().unwrap_or_default();
    let parts: Vec<u64> = core
        .split('.')
        .map(|p| p.parse::<u64>())
        .collect::<Result<_, _>>()
        .map_err(|_| StdError::generic_err(format!("invalid version: {}", version)))?;
    match parts.as_slice() {
        [major, minor, patch] => Ok((*major, *minor, *patch)),
        _ => Err(StdError::generic_err(format!("invalid version: {}", version))),
    }
}

/// Rewrite 0.1.x config and allowances into the current layout.
///
/// Legacy tokens are already live, so their activation grace is treated as
/// elapsed. CW20 tokens are recognised by being valid contract addresses.
pub fn migrate_from_v0_1(storage: &mut dyn Storage, api: &dyn Api) -> StdResult<u32> {
    let legacy = LEGACY_CONFIG.load(storage)?;
    CONFIG.save(
        storage,
        &Config {
            paused: legacy.paused,
            claim_signer: legacy.claim_signer,
            flush_address: legacy.flush_address,
            reserve_days: legacy.reserve_days,
            flush_grace_period: DEFAULT_FLUSH_GRACE_PERIOD,
        },
    )?;

    let records: Vec<(String, LegacyTokenAllowance)> = LEGACY_TOKEN_ALLOWANCES
        .range(storage, None, None, Order::Ascending)
        .collect::<StdResult<_>>()?;

    let mut migrated = 0u32;
    for (token, old) in records {
        let upgraded = TokenAllowance {
            daily_cap: old.daily_cap,
            current_usage: old.current_usage,
            epoch_reset_at: old.epoch_reset_at,
            in_change_allowance_period: old.in_change_allowance_period,
            is_native: api.addr_validate(&token).is_err(),
            pending_daily_cap: None,
            activated_at: Timestamp::from_seconds(0),
        };
        TOKEN_ALLOWANCES.save(storage, &token, &upgraded)?;
        migrated += 1;
    }
    Ok(migrated)
}

/// Run all steps between the stored version and this build.
///
/// Returns the previous version and the number of rewritten allowances.
pub fn run_migrations(
    storage: &mut dyn Storage,
    api: &dyn Api,
) -> Result<(String, u32), ContractError> {
    let stored = cw2::get_contract_version(storage)?;
    if stored.contract != CONTRACT_NAME {
        return Err(ContractError::InvalidMigration {
            contract: stored.contract,
            from: stored.version,
            to: CONTRACT_VERSION.to_string(),
        });
    }

    let from = parse_version(&stored.version)?;
    let to = parse_version(CONTRACT_VERSION)?;
    if from > to {
        return Err(ContractError::InvalidMigration {
            contract: stored.contract,
            from: stored.version,
            to: CONTRACT_VERSION.to_string(),
        });
    }

    let mut migrated = 0;
    if from < (0, 2, 0) {
        migrated += migrate_from_v0_1(storage, api)?;
    }

    cw2::set_contract_version(storage, CONTRACT_NAME, CONTRACT_VERSION)?;
    Ok((stored.version, migrated))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cosmwasm_std::testing::{MockApi, MockStorage};

    #[test]
    fn test_parse_version() {
        assert_eq!(parse_version("0.2.0").unwrap(), (0, 2, 0));
        assert_eq!(parse_version("1.10.3-rc.1").unwrap(), (1, 10, 3));
        assert!(parse_version("1.2").is_err());
        assert!(parse_version("one.two.three").is_err());
    }

    #[test]
    fn test_migrate_legacy_layout() {
        let mut storage = MockStorage::new();
        let api = MockApi::default();
        cw2::set_contract_version(&mut storage, CONTRACT_NAME, "0.1.4").unwrap();
        LEGACY_CONFIG
            .save(
                &mut storage,
                &LegacyConfig {
                    paused: false,
                    claim_signer: Binary::from(vec![2u8; 33]),
                    flush_address: Addr::unchecked("treasury"),
                    reserve_days: 3,
                },
            )
            .unwrap();
        LEGACY_TOKEN_ALLOWANCES
            .save(
                &mut storage,
                "uluna",
                &LegacyTokenAllowance {
                    daily_cap: Uint128::new(1_000),
                    current_usage: Uint128::new(250),
                    epoch_reset_at: Timestamp::from_seconds(86_400),
                    in_change_allowance_period: false,
                },
            )
            .unwrap();

        let (from, migrated) = run_migrations(&mut storage, &api).unwrap();
        assert_eq!(from, "0.1.4");
        assert_eq!(migrated, 1);

        let allowance = TOKEN_ALLOWANCES.load(&storage, "uluna").unwrap();
        assert_eq!(allowance.current_usage, Uint128::new(250));
        assert_eq!(allowance.epoch_reset_at, Timestamp::from_seconds(86_400));
        assert_eq!(allowance.pending_daily_cap, None);

        let config = CONFIG.load(&storage).unwrap();
        assert_eq!(config.reserve_days, 3);
        assert_eq!(config.flush_grace_period, DEFAULT_FLUSH_GRACE_PERIOD);
        assert_eq!(
            cw2::get_contract_version(&storage).unwrap().version,
            CONTRACT_VERSION
        );
    }

    #[test]
    fn test_rejects_foreign_contract_and_downgrade() {
        let mut storage = MockStorage::new();
        let api = MockApi::default();

        cw2::set_contract_version(&mut storage, "crates.io:other", "0.1.0").unwrap();
        assert!(matches!(
            run_migrations(&mut storage, &api).unwrap_err(),
            ContractError::InvalidMigration { .. }
        ));

        cw2::set_contract_version(&mut storage, CONTRACT_NAME, "99.0.0").unwrap();
        assert!(matches!(
            run_migrations(&mut storage, &api).unwrap_err(),
            ContractError::InvalidMigration { .. }
        ));
    }
}
