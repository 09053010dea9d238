//! EVM JSON-RPC reader
//!
//! Raw `eth_getTransactionReceipt` / `eth_getTransactionByHash` /
//! `eth_blockNumber` calls over reqwest. URLs are tried in order; an RPC-level
//! error is returned as-is, transport failures move on to the next URL.

use std::time::Duration;

use alloy::primitives::{B256, U256};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{ReaderError, SourceChainReader, SourceLog, SourceReceipt};
use crate::types::TxHash;

/// EVM transaction receipt from RPC
#[derive(Debug, Deserialize)]
struct TransactionReceipt {
    #[serde(rename = "blockNumber")]
    block_number: Option<String>,
    status: Option<String>,
    from: String,
    to: Option<String>,
    #[serde(default)]
    logs: Vec<Log>,
}

/// EVM log entry from RPC
#[derive(Debug, Deserialize)]
struct Log {
    address: String,
    topics: Vec<String>,
    data: String,
}

/// EVM transaction from RPC (only the fields a deposit needs)
#[derive(Debug, Deserialize)]
struct Transaction {
    input: String,
    value: String,
}

/// EVM RPC response wrapper
#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

/// EVM RPC error
#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

pub struct EvmRpcReader {
    rpc_urls: Vec<String>,
    client: Client,
}

impl EvmRpcReader {
    pub fn new(rpc_urls: Vec<String>, timeout: Duration) -> Result<Self, ReaderError> {
        if rpc_urls.is_empty() {
            return Err(ReaderError::Transport(
                "at least one RPC URL is required".to_string(),
            ));
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ReaderError::Transport(e.to_string()))?;

        Ok(Self { rpc_urls, client })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<Option<T>, ReaderError> {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        });

        let mut last_error = None;

        for url in &self.rpc_urls {
            let response = match self.client.post(url).json(&body).send().await {
                Ok(response) => response,
                Err(e) => {
                    warn!(url = %url, method, error = %e, "Source RPC request failed");
                    last_error = Some(if e.is_timeout() {
                        ReaderError::Timeout
                    } else {
                        ReaderError::Transport(e.to_string())
                    });
                    continue;
                }
            };

            let parsed = match response.json::<RpcResponse<T>>().await {
                Ok(parsed) => parsed,
                Err(e) if e.is_timeout() => {
                    last_error = Some(ReaderError::Timeout);
                    continue;
                }
                Err(e) => {
                    warn!(url = %url, method, error = %e, "Unreadable source RPC response");
                    last_error = Some(ReaderError::Malformed(e.to_string()));
                    continue;
                }
            };

            if let Some(error) = parsed.error {
                return Err(ReaderError::Rpc {
                    code: error.code,
                    message: error.message,
                });
            }
            return Ok(parsed.result);
        }

        Err(last_error.unwrap_or(ReaderError::Transport("no RPC URL answered".to_string())))
    }
}

fn parse_hex_u64(raw: &str) -> Result<u64, ReaderError> {
    u64::from_str_radix(raw.trim_start_matches("0x"), 16)
        .map_err(|e| ReaderError::Malformed(format!("bad quantity {}: {}", raw, e)))
}

fn parse_hex_u256(raw: &str) -> Result<U256, ReaderError> {
    let digits = raw.trim_start_matches("0x");
    if digits.is_empty() {
        return Ok(U256::ZERO);
    }
    U256::from_str_radix(digits, 16)
        .map_err(|e| ReaderError::Malformed(format!("bad quantity {}: {}", raw, e)))
}

fn parse_hex_bytes(raw: &str) -> Result<Vec<u8>, ReaderError> {
    hex::decode(raw.trim_start_matches("0x"))
        .map_err(|e| ReaderError::Malformed(format!("bad calldata: {}", e)))
}

fn parse_log(log: Log) -> Result<SourceLog, ReaderError> {
    let topics = log
        .topics
        .iter()
        .map(|topic| {
            topic
                .parse::<B256>()
                .map_err(|e| ReaderError::Malformed(format!("bad log topic {}: {}", topic, e)))
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(SourceLog {
        address: log.address.to_lowercase(),
        topics,
        data: parse_hex_bytes(&log.data)?,
    })
}

/// Combine receipt and transaction into a [`SourceReceipt`]; `None` while the
/// receipt has no block yet.
fn into_receipt(
    receipt: TransactionReceipt,
    transaction: Transaction,
) -> Result<Option<SourceReceipt>, ReaderError> {
    let Some(block_number) = receipt.block_number.as_deref() else {
        return Ok(None);
    };

    Ok(Some(SourceReceipt {
        block_number: parse_hex_u64(block_number)?,
        succeeded: receipt.status.as_deref() == Some("0x1"),
        from: receipt.from.to_lowercase(),
        to: receipt.to.map(|to| to.to_lowercase()),
        input: parse_hex_bytes(&transaction.input)?,
        value: parse_hex_u256(&transaction.value)?,
        logs: receipt
            .logs
            .into_iter()
            .map(parse_log)
            .collect::<Result<_, _>>()?,
    }))
}

#[async_trait]
impl SourceChainReader for EvmRpcReader {
    async fn transaction_receipt(
        &self,
        hash: &TxHash,
    ) -> Result<Option<SourceReceipt>, ReaderError> {
        let params = serde_json::json!([hash.as_str()]);

        let Some(receipt) = self
            .call::<TransactionReceipt>("eth_getTransactionReceipt", params.clone())
            .await?
        else {
            debug!(tx_hash = %hash, "No receipt yet");
            return Ok(None);
        };

        let transaction = self
            .call::<Transaction>("eth_getTransactionByHash", params)
            .await?
            .ok_or_else(|| {
                ReaderError::Malformed(format!("receipt without transaction for {}", hash))
            })?;

        into_receipt(receipt, transaction)
    }

    async fn block_height(&self) -> Result<u64, ReaderError> {
        let hex = self
            .call::<String>("eth_blockNumber", serde_json::json!([]))
            .await?
            .ok_or_else(|| ReaderError::Malformed("No block number returned".to_string()))?;
        parse_hex_u64(&hex)
    }
}
