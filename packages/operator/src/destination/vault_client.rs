//! Vault LCD client
//!
//! Signs `release` executions with the operator key (cosmrs, SIGN_MODE_DIRECT),
//! broadcasts them through the LCD REST API and waits for block inclusion.
//! Also answers nonce and release-history lookups for the rest of the operator.

use std::time::Duration;

use async_trait::async_trait;
use bip39::Mnemonic;
use bridge_vault::msg::{ExecuteMsg, NonceResponse, QueryMsg};
use cosmrs::{
    bip32::DerivationPath,
    crypto::secp256k1::SigningKey,
    tx::{self, Fee, Msg, SignDoc, SignerInfo},
    AccountId, Coin,
};
use cosmwasm_std::Uint128;
use eyre::{eyre, Result, WrapErr};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{classify_failure, DestinationWriter, NonceSource, TransferError};

/// Cosmos derivation path for coin type 330
const DERIVATION_PATH: &str = "m/44'/330'/0'/0/0";

/// Everything needed to sign for and talk to one vault deployment
#[derive(Clone)]
pub struct VaultClientConfig {
    /// LCD endpoints, tried in order
    pub lcd_urls: Vec<String>,
    pub chain_id: String,
    pub vault_address: String,
    pub address_prefix: String,
    pub mnemonic: String,
    pub fee_denom: String,
    pub gas_price: f64,
    pub gas_limit: u64,
    pub request_timeout: Duration,
    /// How long to wait for a broadcast transaction to land in a block
    pub inclusion_timeout: Duration,
    pub inclusion_poll_interval: Duration,
}

impl std::fmt::Debug for VaultClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultClientConfig")
            .field("lcd_urls", &self.lcd_urls)
            .field("chain_id", &self.chain_id)
            .field("vault_address", &self.vault_address)
            .field("address_prefix", &self.address_prefix)
            .field("mnemonic", &"<redacted>")
            .field("fee_denom", &self.fee_denom)
            .field("gas_price", &self.gas_price)
            .field("gas_limit", &self.gas_limit)
            .finish()
    }
}

/// Account info from LCD
#[derive(Debug, Clone)]
struct AccountInfo {
    sequence: u64,
    account_number: u64,
}

/// Transaction lookup response from LCD
#[derive(Debug, Deserialize)]
struct TxResponse {
    tx_response: Option<TxResponseInner>,
}

#[derive(Debug, Deserialize)]
struct TxResponseInner {
    txhash: String,
    #[serde(default)]
    code: u64,
    #[serde(default)]
    raw_log: Option<String>,
}

/// Event search response from LCD
#[derive(Debug, Deserialize)]
struct TxSearchResponse {
    #[serde(default)]
    tx_responses: Vec<TxResponseInner>,
}

/// Smart query wrapper from LCD
#[derive(Debug, Deserialize)]
struct SmartQueryResponse<T> {
    data: T,
}

pub struct VaultClient {
    lcd_urls: Vec<String>,
    chain_id: String,
    vault_address: String,
    fee_denom: String,
    gas_price: f64,
    gas_limit: u64,
    signing_key: SigningKey,
    /// Operator account address
    pub address: AccountId,
    client: Client,
    inclusion_timeout: Duration,
    inclusion_poll_interval: Duration,
    /// Held from sequence lookup through inclusion so two releases never
    /// sign with the same account sequence
    submit_lock: Mutex<()>,
}

impl VaultClient {
    /// Derive the operator key from the mnemonic and build the client
    pub fn new(config: VaultClientConfig) -> Result<Self> {
        if config.lcd_urls.is_empty() {
            return Err(eyre!("At least one vault LCD URL is required"));
        }

        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .wrap_err("Failed to create HTTP client")?;

        let mnemonic =
            Mnemonic::parse(&config.mnemonic).map_err(|e| eyre!("Invalid mnemonic: {}", e))?;
        let seed = mnemonic.to_seed("");
        let path: DerivationPath = DERIVATION_PATH
            .parse()
            .map_err(|e| eyre!("Invalid derivation path: {:?}", e))?;

        let signing_key = SigningKey::derive_from_path(seed, &path)
            .map_err(|e| eyre!("Failed to derive signing key: {}", e))?;

        let address = signing_key
            .public_key()
            .account_id(&config.address_prefix)
            .map_err(|e| eyre!("Failed to get account ID: {}", e))?;

        info!(
            address = %address,
            chain_id = %config.chain_id,
            vault = %config.vault_address,
            "Vault client initialized"
        );

        Ok(Self {
            lcd_urls: config.lcd_urls,
            chain_id: config.chain_id,
            vault_address: config.vault_address,
            fee_denom: config.fee_denom,
            gas_price: config.gas_price,
            gas_limit: config.gas_limit,
            signing_key,
            address,
            client,
            inclusion_timeout: config.inclusion_timeout,
            inclusion_poll_interval: config.inclusion_poll_interval,
            submit_lock: Mutex::new(()),
        })
    }

    /// GET against each LCD in turn; `Ok(None)` on 404
    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Option<T>> {
        let mut last_error = None;

        for base in &self.lcd_urls {
            let url = format!("{}{}", base.trim_end_matches('/'), path);
            let response = match self.client.get(&url).query(query).send().await {
                Ok(response) => response,
                Err(e) => {
                    warn!(url = %url, error = %e, "LCD request failed");
                    last_error = Some(eyre!("Network error: {}", e));
                    continue;
                }
            };

            if response.status() == StatusCode::NOT_FOUND {
                return Ok(None);
            }
            if !response.status().is_success() {
                last_error = Some(eyre!(
                    "LCD query failed: {} - {}",
                    response.status(),
                    response.text().await.unwrap_or_default()
                ));
                continue;
            }

            return response
                .json::<T>()
                .await
                .map(Some)
                .wrap_err("Failed to parse LCD response");
        }

        Err(last_error.unwrap_or_else(|| eyre!("No LCD endpoint answered")))
    }

    /// Get account info (sequence and account number)
    async fn get_account_info(&self) -> Result<AccountInfo> {
        let data: serde_json::Value = self
            .get_json(
                &format!("/cosmos/auth/v1beta1/accounts/{}", self.address),
                &[],
            )
            .await?
            .ok_or_else(|| eyre!("Operator account {} not found", self.address))?;

        let account = data
            .get("account")
            .ok_or_else(|| eyre!("Missing 'account' field in response"))?;

        let field = |name: &str| -> Result<u64> {
            account
                .get(name)
                .or_else(|| account.get("base_account").and_then(|b| b.get(name)))
                .and_then(|v| v.as_str())
                .unwrap_or("0")
                .parse()
                .wrap_err_with(|| format!("Invalid account {}", name))
        };

        Ok(AccountInfo {
            sequence: field("sequence")?,
            account_number: field("account_number")?,
        })
    }

    /// Sign an execute message against the vault and return the tx bytes
    fn sign_execute(&self, msg: &impl Serialize, account: &AccountInfo) -> Result<Vec<u8>> {
        let execute_msg = cosmrs::cosmwasm::MsgExecuteContract {
            sender: self.address.clone(),
            contract: self
                .vault_address
                .parse()
                .map_err(|e| eyre!("Invalid vault address: {:?}", e))?,
            msg: serde_json::to_vec(msg)?,
            funds: vec![],
        };

        let body = tx::Body::new(
            vec![execute_msg
                .to_any()
                .map_err(|e| eyre!("Failed to convert message: {}", e))?],
            "",
            0u32,
        );

        let signer_info =
            SignerInfo::single_direct(Some(self.signing_key.public_key()), account.sequence);

        let fee_amount = ((self.gas_limit as f64) * self.gas_price).ceil() as u128;
        let fee = Fee::from_amount_and_gas(
            Coin {
                denom: self
                    .fee_denom
                    .parse()
                    .map_err(|e| eyre!("Invalid fee denom: {}", e))?,
                amount: fee_amount,
            },
            self.gas_limit,
        );

        let auth_info = signer_info.auth_info(fee);
        let chain_id = self
            .chain_id
            .parse()
            .map_err(|_| eyre!("Invalid chain ID"))?;

        let sign_doc = SignDoc::new(&body, &auth_info, &chain_id, account.account_number)
            .map_err(|e| eyre!("Failed to create sign doc: {}", e))?;

        sign_doc
            .sign(&self.signing_key)
            .map_err(|e| eyre!("Failed to sign transaction: {}", e))?
            .to_bytes()
            .map_err(|e| eyre!("Failed to serialize transaction: {}", e))
    }

    /// Broadcast signed bytes (sync mode). A CheckTx failure is final for
    /// this attempt; transport failures fall through to the next LCD.
    async fn broadcast_tx(&self, tx_bytes: &[u8], reference: &str) -> Result<String, TransferError> {
        let tx_b64 = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, tx_bytes);
        let request = serde_json::json!({
            "tx_bytes": tx_b64,
            "mode": "BROADCAST_MODE_SYNC"
        });

        let mut last_error = None;

        for base in &self.lcd_urls {
            let url = format!("{}/cosmos/tx/v1beta1/txs", base.trim_end_matches('/'));
            debug!(url = %url, "Broadcasting transaction");

            let response = match self.client.post(&url).json(&request).send().await {
                Ok(response) => response,
                Err(e) => {
                    warn!(url = %url, error = %e, "Failed to broadcast to endpoint");
                    last_error = Some(TransferError::Network(e.to_string()));
                    continue;
                }
            };

            let status = response.status();
            let body: TxResponse = match response.json().await {
                Ok(body) if status.is_success() => body,
                Ok(_) | Err(_) => {
                    last_error = Some(TransferError::Network(format!(
                        "broadcast returned {}",
                        status
                    )));
                    continue;
                }
            };

            let Some(tx_response) = body.tx_response else {
                last_error = Some(TransferError::Network(
                    "broadcast response without tx_response".to_string(),
                ));
                continue;
            };

            if tx_response.code != 0 {
                let raw_log = tx_response.raw_log.unwrap_or_default();
                warn!(code = tx_response.code, raw_log = %raw_log, "Broadcast rejected");
                return Err(classify_failure(reference, tx_response.code, &raw_log));
            }

            info!(txhash = %tx_response.txhash, "Transaction broadcast successful");
            return Ok(tx_response.txhash);
        }

        Err(last_error.unwrap_or_else(|| {
            TransferError::Network("all broadcast attempts failed".to_string())
        }))
    }

    /// Poll until the transaction is in a block. A DeliverTx failure is
    /// classified like a broadcast failure.
    async fn wait_for_inclusion(&self, tx_hash: &str, reference: &str) -> Result<(), TransferError> {
        let deadline = Instant::now() + self.inclusion_timeout;

        loop {
            match self
                .get_json::<TxResponse>(&format!("/cosmos/tx/v1beta1/txs/{}", tx_hash), &[])
                .await
            {
                Ok(Some(TxResponse {
                    tx_response: Some(tx),
                })) => {
                    if tx.code == 0 {
                        return Ok(());
                    }
                    let raw_log = tx.raw_log.unwrap_or_default();
                    warn!(tx_hash, code = tx.code, raw_log = %raw_log, "Release failed in block");
                    return Err(classify_failure(reference, tx.code, &raw_log));
                }
                Ok(_) => debug!(tx_hash, "Release not yet included"),
                Err(e) => warn!(tx_hash, error = %e, "Failed to query release transaction"),
            }

            if Instant::now() + self.inclusion_poll_interval > deadline {
                return Err(TransferError::Unconfirmed {
                    tx_hash: tx_hash.to_string(),
                });
            }
            tokio::time::sleep(self.inclusion_poll_interval).await;
        }
    }

    /// Smart query against the vault
    async fn query_vault<T: DeserializeOwned>(&self, query: &QueryMsg) -> Result<T> {
        let query_json = serde_json::to_string(query)?;
        let query_b64 =
            base64::Engine::encode(&base64::engine::general_purpose::STANDARD, query_json);

        let response: SmartQueryResponse<T> = self
            .get_json(
                &format!(
                    "/cosmwasm/wasm/v1/contract/{}/smart/{}",
                    self.vault_address, query_b64
                ),
                &[],
            )
            .await?
            .ok_or_else(|| eyre!("Vault {} not found", self.vault_address))?;

        Ok(response.data)
    }
}

#[async_trait]
impl DestinationWriter for VaultClient {
    async fn transfer(
        &self,
        token: &str,
        destination: &str,
        amount: u128,
        reference: &str,
    ) -> Result<String, TransferError> {
        let msg = ExecuteMsg::Release {
            token: token.to_string(),
            recipient: destination.to_string(),
            amount: Uint128::new(amount),
            reference: reference.to_string(),
        };

        let _guard = self.submit_lock.lock().await;

        let account = self
            .get_account_info()
            .await
            .map_err(|e| TransferError::Network(format!("{:#}", e)))?;

        let tx_bytes = self
            .sign_execute(&msg, &account)
            .map_err(|e| TransferError::Rejected {
                code: "TRANSFER_REJECTED".to_string(),
                message: format!("{:#}", e),
            })?;

        let tx_hash = self.broadcast_tx(&tx_bytes, reference).await?;
        self.wait_for_inclusion(&tx_hash, reference).await?;

        info!(
            tx_hash = %tx_hash,
            reference,
            token,
            amount,
            "Release included"
        );
        Ok(tx_hash)
    }

    async fn find_transfer(&self, reference: &str) -> Result<Option<String>, TransferError> {
        let events = format!("wasm.release_reference='{}'", reference.to_lowercase());

        let found: Option<TxSearchResponse> = self
            .get_json("/cosmos/tx/v1beta1/txs", &[("events", events)])
            .await
            .map_err(|e| TransferError::Network(format!("{:#}", e)))?;

        Ok(found.and_then(|search| {
            search
                .tx_responses
                .into_iter()
                .find(|tx| tx.code == 0)
                .map(|tx| tx.txhash)
        }))
    }
}

#[async_trait]
impl NonceSource for VaultClient {
    async fn next_nonce(&self, recipient: &str) -> Result<u64> {
        let response: NonceResponse = self
            .query_vault(&QueryMsg::Nonce {
                recipient: recipient.to_string(),
            })
            .await
            .wrap_err_with(|| format!("Failed to read nonce for {}", recipient))?;
        Ok(response.nonce)
    }
}
