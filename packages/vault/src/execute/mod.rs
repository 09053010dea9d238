//! Execute handlers for the bridge vault contract.
//!
//! Handlers are organized by category:
//! - `ledger` - Token support and daily cap changes
//! - `outflow` - Operator releases and claim redemption
//! - `flush` - Reserve flushing and its settings
//! - `admin` - Roles, claim signer, pause/unpause
//!
//! Role checks happen in `contract::execute` before dispatch.

mod admin;
mod flush;
mod ledger;
mod outflow;

pub use admin::*;
pub use flush::*;
pub use ledger::*;
pub use outflow::*;
