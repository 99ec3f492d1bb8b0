//! Configuration management for the swap engine
//!
//! Loads configuration from TOML files with environment variable substitution.

use crate::error::{SwapError, SwapResult};

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub engine: EngineConfig,
    pub escrow: EscrowConfig,
    pub storage: StorageConfig,
    pub api: ApiConfig,
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Testnet,
    Mainnet,
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Network::Testnet => f.write_str("testnet"),
            Network::Mainnet => f.write_str("mainnet"),
        }
    }
}

/// Longest swap lifetime accepted (30 days)
pub const MAX_SWAP_EXPIRY_SECS: u64 = 30 * 24 * 3_600;

/// Every option the lifecycle engine reads
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub network: Network,
    /// Allowed intermediary price deviation from consensus
    pub price_tolerance_ppm: u64,
    pub min_price_sources: usize,
    pub max_quote_staleness_secs: u64,
    /// Largest fee / input ratio accepted from an intermediary
    pub max_fee_ppm: u64,
    pub swap_expiry_secs: u64,
    pub poll_interval_ms: u64,
    pub request_timeout_ms: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub max_retry_delay_ms: u64,
    pub max_concurrent_swaps: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            network: Network::Testnet,
            price_tolerance_ppm: 10_000,
            min_price_sources: 2,
            max_quote_staleness_secs: 60,
            max_fee_ppm: 20_000,
            swap_expiry_secs: 3_600,
            poll_interval_ms: 1_000,
            request_timeout_ms: 10_000,
            max_retries: 5,
            retry_delay_ms: 500,
            max_retry_delay_ms: 30_000,
            max_concurrent_swaps: 64,
        }
    }
}

impl EngineConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Validate engine options
    pub fn validate(&self) -> SwapResult<()> {
        if self.price_tolerance_ppm > 1_000_000 {
            return Err(SwapError::Config(format!(
                "price_tolerance_ppm must be <= 1000000, got {}",
                self.price_tolerance_ppm
            )));
        }
        if self.max_fee_ppm > 1_000_000 {
            return Err(SwapError::Config(format!(
                "max_fee_ppm must be <= 1000000, got {}",
                self.max_fee_ppm
            )));
        }
        if self.min_price_sources == 0 {
            return Err(SwapError::Config(
                "min_price_sources must be at least 1".to_string(),
            ));
        }

        if self.swap_expiry_secs > MAX_SWAP_EXPIRY_SECS {
            return Err(SwapError::Config(format!(
                "swap_expiry_secs must be <= {MAX_SWAP_EXPIRY_SECS}, got {}",
                self.swap_expiry_secs
            )));
        }

        let nonzero = [
            ("max_quote_staleness_secs", self.max_quote_staleness_secs),
            ("swap_expiry_secs", self.swap_expiry_secs),
            ("poll_interval_ms", self.poll_interval_ms),
            ("request_timeout_ms", self.request_timeout_ms),
            ("max_concurrent_swaps", self.max_concurrent_swaps as u64),
        ];
        for (name, value) in nonzero {
            if value == 0 {
                return Err(SwapError::Config(format!("{name} must be greater than zero")));
            }
        }

        if self.retry_delay_ms > self.max_retry_delay_ms {
            return Err(SwapError::Config(
                "retry_delay_ms must not exceed max_retry_delay_ms".to_string(),
            ));
        }

        Ok(())
    }
}

/// Confirmation depth and RPC settings belong to the escrow client, not here
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EscrowConfig {
    /// Escrow contract address keyed by network name
    pub contract_addresses: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    File,
    Postgres,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Directory for the file backend
    pub path: Option<PathBuf>,
    /// Connection URL for the postgres backend
    pub url: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    1
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingConfig {
    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

fn default_true() -> bool {
    true
}

impl Settings {
    /// Load settings from configuration files
    pub fn load() -> Result<Self> {
        let config_path = env::var("SWAP_ENGINE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        let config_str = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        Self::from_toml(&config_str)
    }

    /// Parse and validate settings from a TOML document
    pub fn from_toml(input: &str) -> Result<Self> {
        // Substitute environment variables
        let config_str = substitute_env_vars(input);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        self.engine.validate()?;

        if self.contract_address().map_or(true, str::is_empty) {
            anyhow::bail!(
                "No escrow contract address configured for network {}",
                self.engine.network
            );
        }

        match self.storage.backend {
            StorageBackend::File if self.storage.path.is_none() => {
                anyhow::bail!("storage.path is required for the file backend");
            }
            StorageBackend::Postgres if self.storage.url.is_none() => {
                anyhow::bail!("storage.url is required for the postgres backend");
            }
            StorageBackend::Memory => {
                tracing::warn!("Memory storage selected - swaps will not survive a restart");
            }
            _ => {}
        }

        Ok(())
    }

    /// Escrow contract address for the active network
    pub fn contract_address(&self) -> Option<&str> {
        self.escrow
            .contract_addresses
            .get(&self.engine.network.to_string())
            .map(String::as_str)
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    lazy_static::lazy_static! {
        static ref ENV_VAR: regex::Regex =
            regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").expect("valid env var pattern");
    }

    ENV_VAR
        .replace_all(input, |caps: &regex::Captures| {
            env::var(&caps[1]).unwrap_or_default()
        })
        .into_owned()
}
