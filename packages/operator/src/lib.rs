//! Bridge operator
//!
//! Watches EVM deposits into the custody address, waits for them to reach the
//! required depth, releases the matching amount from the vault and signs
//! redemption claims.

pub mod address;
pub mod api;
pub mod claims;
pub mod config;
pub mod db;
pub mod deposit;
pub mod destination;
pub mod metrics;
pub mod orchestrator;
pub mod retry;
pub mod service;
pub mod signer;
pub mod source;
pub mod store;
pub mod tracker;
pub mod types;
pub mod worker;

#[cfg(test)]
mod testing;
