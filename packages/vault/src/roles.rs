//! Role-checked command interface.
//!
//! Each `ExecuteMsg` names the role its sender must hold; `authorize` is
//! consulted before any handler runs.

use cosmwasm_std::{Addr, Order, StdResult, Storage};

use crate::error::ContractError;
use crate::msg::ExecuteMsg;
use crate::state::{Role, ROLE_COUNTS, ROLE_MEMBERS};

impl ExecuteMsg {
    /// Role required to issue this command, `None` for open commands.
    pub fn required_role(&self) -> Option<Role> {
        match self {
            ExecuteMsg::Release { .. } | ExecuteMsg::Flush {} => Some(Role::Operator),
            ExecuteMsg::Redeem { .. } => None,
            ExecuteMsg::AddTokenSupport { .. }
            | ExecuteMsg::ChangeDailyCap { .. }
            | ExecuteMsg::RemoveTokenSupport { .. }
            | ExecuteMsg::ChangeFlushAddress { .. }
            | ExecuteMsg::ChangeReserveDays { .. }
            | ExecuteMsg::SetClaimSigner { .. }
            | ExecuteMsg::GrantRole { .. }
            | ExecuteMsg::RevokeRole { .. }
            | ExecuteMsg::Pause {}
            | ExecuteMsg::Unpause {} => Some(Role::Admin),
        }
    }
}

pub fn has_role(storage: &dyn Storage, role: Role, actor: &Addr) -> StdResult<bool> {
    Ok(ROLE_MEMBERS
        .may_load(storage, (role.as_str(), actor))?
        .unwrap_or(false))
}

/// Check `actor` against the role `msg` requires.
pub fn authorize(storage: &dyn Storage, actor: &Addr, msg: &ExecuteMsg) -> Result<(), ContractError> {
    match msg.required_role() {
        Some(role) if !has_role(storage, role, actor)? => Err(ContractError::Unauthorized { role }),
        _ => Ok(()),
    }
}

/// Add `member` to `role`. Returns false if it already held the role.
pub fn grant(storage: &mut dyn Storage, role: Role, member: &Addr) -> StdResult<bool> {
    if has_role(storage, role, member)? {
        return Ok(false);
    }
    ROLE_MEMBERS.save(storage, (role.as_str(), member), &true)?;
    ROLE_COUNTS.update(storage, role.as_str(), |count| -> StdResult<_> {
        Ok(count.unwrap_or_default() + 1)
    })?;
    Ok(true)
}

/// Remove `member` from `role`. The last admin cannot be removed.
pub fn revoke(storage: &mut dyn Storage, role: Role, member: &Addr) -> Result<bool, ContractError> {
    if !has_role(storage, role, member)? {
        return Ok(false);
    }
    let count = ROLE_COUNTS.may_load(storage, role.as_str())?.unwrap_or_default();
    if role == Role::Admin && count <= 1 {
        return Err(ContractError::LastRoleMember { role });
    }
    ROLE_MEMBERS.remove(storage, (role.as_str(), member));
    ROLE_COUNTS.save(storage, role.as_str(), &count.saturating_sub(1))?;
    Ok(true)
}

/// Roles held by `member`
pub fn roles_of(storage: &dyn Storage, member: &Addr) -> StdResult<Vec<Role>> {
    [Role::Admin, Role::Operator]
        .into_iter()
        .filter_map(|role| match has_role(storage, role, member) {
            Ok(true) => Some(Ok(role)),
            Ok(false) => None,
            Err(e) => Some(Err(e)),
        })
        .collect()
}

/// Members of a role, in address order
pub fn members(storage: &dyn Storage, role: Role) -> StdResult<Vec<Addr>> {
    ROLE_MEMBERS
        .prefix(role.as_str())
        .keys(storage, None, None, Order::Ascending)
        .collect()
}
