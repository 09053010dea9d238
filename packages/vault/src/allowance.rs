//! Allowance ledger
//!
//! Daily outflow caps per token. The epoch boundary advances in whole
//! `EPOCH_LENGTH` steps from its original anchor, so a token that sees no
//! activity for several days resumes on the same time-of-day boundary.
//!
//! A timestamp earlier than the current boundary never rolls the epoch and
//! never moves the boundary back; usage is checked against the current window.

use cosmwasm_std::{Order, StdResult, Storage, Timestamp, Uint128};
use cw_storage_plus::Bound;

use crate::error::ContractError;
use crate::state::{TokenAllowance, EPOCH_LENGTH, TOKEN_ALLOWANCES};

impl TokenAllowance {
    /// Record for a newly supported token. Spending stays refused until
    /// `effective_at`.
    pub fn new(daily_cap: Uint128, is_native: bool, effective_at: Timestamp) -> Self {
        Self {
            daily_cap,
            current_usage: Uint128::zero(),
            epoch_reset_at: effective_at,
            in_change_allowance_period: true,
            is_native,
            pending_daily_cap: None,
            activated_at: effective_at,
        }
    }

    /// Advance the epoch if `now` has reached the reset boundary.
    ///
    /// Returns true when a rollover happened.
    pub fn roll_forward(&mut self, now: Timestamp) -> bool {
        if now < self.epoch_reset_at {
            return false;
        }

        let elapsed = now.seconds() - self.epoch_reset_at.seconds();
        let periods = elapsed / EPOCH_LENGTH + 1;
        self.epoch_reset_at = self.epoch_reset_at.plus_seconds(periods * EPOCH_LENGTH);
        self.current_usage = Uint128::zero();
        if let Some(cap) = self.pending_daily_cap.take() {
            self.daily_cap = cap;
        }
        self.in_change_allowance_period = false;
        true
    }

    /// State as it would look at `now`, without touching storage.
    pub fn effective(&self, now: Timestamp) -> TokenAllowance {
        let mut view = self.clone();
        view.roll_forward(now);
        view
    }

    /// Whether a scheduled change (or initial activation) is still pending.
    pub fn in_change_period(&self, now: Timestamp) -> bool {
        self.in_change_allowance_period && now < self.epoch_reset_at
    }

    pub fn remaining(&self) -> Uint128 {
        self.daily_cap.saturating_sub(self.current_usage)
    }

    /// Apply a spend to an already-rolled record.
    fn spend(&mut self, token: &str, amount: Uint128) -> Result<(), ContractError> {
        if self.in_change_allowance_period {
            return Err(ContractError::StillInChangeAllowancePeriod {
                token: token.to_string(),
                effective_at: self.epoch_reset_at,
            });
        }

        let new_usage = self
            .current_usage
            .checked_add(amount)
            .map_err(|_| ContractError::ExceedsDailyAllowance {
                token: token.to_string(),
                requested: amount,
                remaining: self.remaining(),
            })?;

        if new_usage > self.daily_cap {
            return Err(ContractError::ExceedsDailyAllowance {
                token: token.to_string(),
                requested: amount,
                remaining: self.remaining(),
            });
        }

        self.current_usage = new_usage;
        Ok(())
    }
}

/// Load an allowance or fail with `TOKEN_NOT_SUPPORTED`.
pub fn load_allowance(storage: &dyn Storage, token: &str) -> Result<TokenAllowance, ContractError> {
    TOKEN_ALLOWANCES
        .may_load(storage, token)?
        .ok_or_else(|| ContractError::TokenNotSupported {
            token: token.to_string(),
        })
}

/// Charge `amount` of `token` against today's allowance.
///
/// Nothing is written unless the spend is accepted.
pub fn try_spend(
    storage: &mut dyn Storage,
    now: Timestamp,
    token: &str,
    amount: Uint128,
) -> Result<TokenAllowance, ContractError> {
    let mut allowance = load_allowance(storage, token)?;
    allowance.roll_forward(now);
    allowance.spend(token, amount)?;
    TOKEN_ALLOWANCES.save(storage, token, &allowance)?;
    Ok(allowance)
}

pub fn add_support(
    storage: &mut dyn Storage,
    now: Timestamp,
    token: &str,
    is_native: bool,
    daily_cap: Uint128,
    effective_at: Timestamp,
) -> Result<TokenAllowance, ContractError> {
    if TOKEN_ALLOWANCES.has(storage, token) {
        return Err(ContractError::TokenAlreadySupported {
            token: token.to_string(),
        });
    }
    if effective_at <= now {
        return Err(ContractError::InvalidEffectiveTime {
            effective_at,
            not_before: now,
        });
    }

    let allowance = TokenAllowance::new(daily_cap, is_native, effective_at);
    TOKEN_ALLOWANCES.save(storage, token, &allowance)?;
    Ok(allowance)
}

/// Schedule `new_cap` to take effect at `effective_at`.
///
/// The boundary only moves forward, so `effective_at` may not precede the
/// current (rolled) reset boundary.
pub fn change_cap(
    storage: &mut dyn Storage,
    now: Timestamp,
    token: &str,
    new_cap: Uint128,
    effective_at: Timestamp,
) -> Result<TokenAllowance, ContractError> {
    let mut allowance = load_allowance(storage, token)?;
    if effective_at <= now {
        return Err(ContractError::InvalidEffectiveTime {
            effective_at,
            not_before: now,
        });
    }

    allowance.roll_forward(now);
    if effective_at < allowance.epoch_reset_at {
        return Err(ContractError::InvalidEffectiveTime {
            effective_at,
            not_before: allowance.epoch_reset_at,
        });
    }

    allowance.pending_daily_cap = Some(new_cap);
    allowance.epoch_reset_at = effective_at;
    allowance.in_change_allowance_period = true;
    TOKEN_ALLOWANCES.save(storage, token, &allowance)?;
    Ok(allowance)
}

/// Drop support for a token whose effective cap and usage are both zero.
pub fn remove_support(
    storage: &mut dyn Storage,
    now: Timestamp,
    token: &str,
) -> Result<(), ContractError> {
    let allowance = load_allowance(storage, token)?.effective(now);
    if !allowance.daily_cap.is_zero() || !allowance.current_usage.is_zero() {
        return Err(ContractError::SupportStillActive {
            token: token.to_string(),
            daily_cap: allowance.daily_cap,
            current_usage: allowance.current_usage,
        });
    }

    TOKEN_ALLOWANCES.remove(storage, token);
    Ok(())
}

/// Page through allowances in token order.
pub fn list_allowances(
    storage: &dyn Storage,
    start_after: Option<&str>,
    limit: usize,
) -> StdResult<Vec<(String, TokenAllowance)>> {
    let start = start_after.map(Bound::exclusive);
    TOKEN_ALLOWANCES
        .range(storage, start, None, Order::Ascending)
        .take(limit)
        .collect()
}
