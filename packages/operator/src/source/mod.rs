//! Source chain (EVM) access

use alloy::primitives::{B256, U256};
use async_trait::async_trait;
use thiserror::Error;

use crate::retry::{Classify, ErrorClass};
use crate::types::TxHash;

pub mod evm;

pub use evm::EvmRpcReader;

/// Mined transaction as the tracker needs it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceReceipt {
    pub block_number: u64,
    pub succeeded: bool,
    pub from: String,
    pub to: Option<String>,
    pub input: Vec<u8>,
    pub value: U256,
    pub logs: Vec<SourceLog>,
}

/// Event log emitted by the transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLog {
    /// Emitting contract, lowercased
    pub address: String,
    pub topics: Vec<B256>,
    pub data: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum ReaderError {
    #[error("source RPC timed out")]
    Timeout,

    #[error("source RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("source RPC unreachable: {0}")]
    Transport(String),

    #[error("malformed source RPC response: {0}")]
    Malformed(String),
}

impl ReaderError {
    pub fn code(&self) -> &'static str {
        "SOURCE_UNAVAILABLE"
    }
}

impl Classify for ReaderError {
    fn class(&self) -> ErrorClass {
        match self {
            ReaderError::Malformed(_) => ErrorClass::Permanent,
            _ => ErrorClass::Transient,
        }
    }
}

#[async_trait]
pub trait SourceChainReader: Send + Sync {
    /// Receipt and transaction fields, or `None` while not mined
    async fn transaction_receipt(&self, hash: &TxHash)
        -> Result<Option<SourceReceipt>, ReaderError>;

    async fn block_height(&self) -> Result<u64, ReaderError>;
}
