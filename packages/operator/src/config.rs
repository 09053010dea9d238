use eyre::{eyre, Result, WrapErr};
use std::env;
use std::fmt;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use alloy::primitives::Address;

use crate::deposit::TokenRoutes;
use crate::destination::VaultClientConfig;
use crate::orchestrator::{BPS_DENOMINATOR, DEFAULT_FEE_BPS};
use crate::retry::RetryPolicy;
use crate::tracker::DEFAULT_REQUIRED_CONFIRMATIONS;

/// Main configuration for the operator
#[derive(Debug, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub source: SourceConfig,
    pub vault: VaultClientConfig,
    pub claims: ClaimConfig,
    pub allocation: AllocationConfig,
    pub worker: WorkerConfig,
    pub api: ApiConfig,
}

/// Database configuration
#[derive(Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

/// Custom Debug that redacts the database URL (may contain credentials).
impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("url", &"<redacted>")
            .finish()
    }
}

/// Source (EVM) chain configuration
#[derive(Debug, Clone)]
pub struct SourceConfig {
    /// Primary RPC URL followed by fallbacks
    pub rpc_urls: Vec<String>,
    pub chain_id: u64,
    /// Address deposits are paid into
    pub custody_address: Address,
    pub rpc_timeout: Duration,
    pub required_confirmations: u64,
}

/// Claim signing configuration
#[derive(Clone)]
pub struct ClaimConfig {
    /// Hex secp256k1 secret matching the vault's registered claim signer
    pub signer_key: String,
    pub ttl: Duration,
}

/// Custom Debug that redacts the signer key.
impl fmt::Debug for ClaimConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClaimConfig")
            .field("signer_key", &"<redacted>")
            .field("ttl", &self.ttl)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct AllocationConfig {
    pub fee_bps: u32,
    pub routes: TokenRoutes,
    pub retry: RetryPolicy,
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub poll_interval: Duration,
    pub batch_size: i64,
    /// Pay out deposits as soon as they confirm, without an API call
    pub auto_allocate: bool,
}

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub bind_address: SocketAddr,
    /// `json` or anything else for plain text
    pub log_format: String,
}

/// Default functions
fn default_rpc_timeout_ms() -> u64 {
    10_000
}

fn default_address_prefix() -> String {
    "terra".to_string()
}

fn default_fee_denom() -> String {
    "uluna".to_string()
}

fn default_gas_price() -> f64 {
    28.325
}

fn default_gas_limit() -> u64 {
    400_000
}

fn default_claim_ttl_secs() -> u64 {
    86_400
}

fn default_fee_bps() -> u32 {
    DEFAULT_FEE_BPS
}

fn default_poll_interval() -> u64 {
    5000
}

fn default_batch_size() -> i64 {
    50
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_initial_backoff() -> u64 {
    2000
}

fn default_max_backoff() -> u64 {
    60_000
}

fn default_bind_address() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9092))
}

/// Split a comma-separated URL list, dropping blanks
pub fn parse_url_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn required(name: &str) -> Result<String> {
    env::var(name).map_err(|_| eyre!("{} environment variable is required", name))
}

/// Parse an optional variable, falling back to `default` when unset
fn optional<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e| eyre!("{} is invalid: {}", name, e)),
        _ => Ok(default),
    }
}

impl Config {
    /// Load configuration from environment variables
    /// Loads .env file if present, then reads from environment
    pub fn load() -> Result<Self> {
        Self::load_from_file(".env")
    }

    /// Load from a specific .env file path
    pub fn load_from_file(path: &str) -> Result<Self> {
        if Path::new(path).exists() {
            dotenvy::from_filename(path)
                .wrap_err_with(|| format!("Failed to load .env file from {}", path))?;
        }
        Self::load_from_env()
    }

    /// Load configuration from environment variables
    fn load_from_env() -> Result<Self> {
        let database = DatabaseConfig {
            url: required("DATABASE_URL")?,
        };

        let source = SourceConfig {
            rpc_urls: parse_url_list(&required("SOURCE_RPC_URL")?),
            chain_id: required("SOURCE_CHAIN_ID")?
                .parse()
                .wrap_err("SOURCE_CHAIN_ID must be a valid u64")?,
            custody_address: required("SOURCE_CUSTODY_ADDRESS")?
                .parse()
                .wrap_err("SOURCE_CUSTODY_ADDRESS must be a 0x-prefixed EVM address")?,
            rpc_timeout: Duration::from_millis(optional(
                "SOURCE_RPC_TIMEOUT_MS",
                default_rpc_timeout_ms(),
            )?),
            required_confirmations: optional(
                "REQUIRED_CONFIRMATIONS",
                DEFAULT_REQUIRED_CONFIRMATIONS,
            )?,
        };

        let vault = VaultClientConfig {
            lcd_urls: parse_url_list(&required("VAULT_LCD_URL")?),
            chain_id: required("VAULT_CHAIN_ID")?,
            vault_address: required("VAULT_ADDRESS")?,
            address_prefix: optional("VAULT_ADDRESS_PREFIX", default_address_prefix())?,
            mnemonic: required("OPERATOR_MNEMONIC")?,
            fee_denom: optional("VAULT_FEE_DENOM", default_fee_denom())?,
            gas_price: optional("VAULT_GAS_PRICE", default_gas_price())?,
            gas_limit: optional("VAULT_GAS_LIMIT", default_gas_limit())?,
            request_timeout: Duration::from_secs(30),
            inclusion_timeout: Duration::from_secs(60),
            inclusion_poll_interval: Duration::from_secs(2),
        };

        let claims = ClaimConfig {
            signer_key: required("CLAIM_SIGNER_KEY")?,
            ttl: Duration::from_secs(optional("CLAIM_TTL_SECS", default_claim_ttl_secs())?),
        };

        let allocation = AllocationConfig {
            fee_bps: optional("FEE_BPS", default_fee_bps())?,
            routes: TokenRoutes::parse(&env::var("TOKEN_ROUTES").unwrap_or_default())
                .wrap_err("TOKEN_ROUTES is invalid")?,
            retry: RetryPolicy {
                max_attempts: optional("RETRY_MAX_ATTEMPTS", default_retry_attempts())?,
                initial_backoff: Duration::from_millis(optional(
                    "RETRY_INITIAL_BACKOFF_MS",
                    default_initial_backoff(),
                )?),
                max_backoff: Duration::from_millis(optional(
                    "RETRY_MAX_BACKOFF_MS",
                    default_max_backoff(),
                )?),
                backoff_multiplier: 2.0,
            },
        };

        let worker = WorkerConfig {
            poll_interval: Duration::from_millis(optional(
                "POLL_INTERVAL_MS",
                default_poll_interval(),
            )?),
            batch_size: default_batch_size(),
            auto_allocate: optional("AUTO_ALLOCATE", true)?,
        };

        let api = ApiConfig {
            bind_address: optional("API_BIND_ADDRESS", default_bind_address())?,
            log_format: optional("LOG_FORMAT", "text".to_string())?,
        };

        let config = Config {
            database,
            source,
            vault,
            claims,
            allocation,
            worker,
            api,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.database.url.is_empty() {
            return Err(eyre!("database.url cannot be empty"));
        }

        if self.source.rpc_urls.is_empty() {
            return Err(eyre!("SOURCE_RPC_URL cannot be empty"));
        }
        if self.source.required_confirmations == 0 {
            return Err(eyre!("REQUIRED_CONFIRMATIONS must be at least 1"));
        }

        if self.vault.lcd_urls.is_empty() {
            return Err(eyre!("VAULT_LCD_URL cannot be empty"));
        }
        if self.vault.chain_id.is_empty() {
            return Err(eyre!("VAULT_CHAIN_ID cannot be empty"));
        }
        if !self
            .vault
            .vault_address
            .starts_with(&format!("{}1", self.vault.address_prefix))
        {
            return Err(eyre!(
                "VAULT_ADDRESS must be a {} address",
                self.vault.address_prefix
            ));
        }

        let mnemonic_words = self.vault.mnemonic.split_whitespace().count();
        if mnemonic_words < 12 {
            return Err(eyre!("OPERATOR_MNEMONIC must have at least 12 words"));
        }

        let key = self.claims.signer_key.trim_start_matches("0x");
        if key.len() != 64 || hex::decode(key).is_err() {
            return Err(eyre!("CLAIM_SIGNER_KEY must be 32 bytes of hex"));
        }
        if self.claims.ttl.is_zero() {
            return Err(eyre!("CLAIM_TTL_SECS must be positive"));
        }

        if u128::from(self.allocation.fee_bps) > BPS_DENOMINATOR {
            return Err(eyre!("FEE_BPS cannot exceed {}", BPS_DENOMINATOR));
        }
        if self.allocation.routes.is_empty() {
            return Err(eyre!("TOKEN_ROUTES must route at least one source token"));
        }
        if self.allocation.retry.max_attempts == 0 {
            return Err(eyre!("RETRY_MAX_ATTEMPTS must be at least 1"));
        }

        Ok(())
    }
}
