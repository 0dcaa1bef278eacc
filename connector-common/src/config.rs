//! Configuration management for the payment connector.
//!
//! Settings are stored in TOML format with one section per adapter plus the
//! logging section. Every field carries a default so a partial file is valid;
//! `validate` must still be called before the values are handed to an
//! adapter.
//!
//! ```toml
//! [bitcoind]
//! asset = "BTC"
//! network = "regtest"
//! min_confirmations = 1
//!
//! [lnd]
//! host = "localhost"
//! port = "9735"
//! ```

use anyhow::{anyhow, bail, Result};
use bitcoin::Network;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::logging::{log_event, LogConfig, LogContext, LogLevel};
use crate::math;

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ConnectorConfig {
    #[serde(default)]
    pub bitcoind: BitcoindConfig,

    #[serde(default)]
    pub lnd: LndConfig,

    #[serde(default)]
    pub logging: LogConfig,
}

/// Settings of the blockchain adapter backed by a bitcoind-style node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BitcoindConfig {
    /// Asset tag reported to the platform
    #[serde(default = "default_asset")]
    pub asset: String,

    /// One of bitcoin, testnet, signet, regtest
    #[serde(default = "default_network")]
    pub network: String,

    /// Confirmations an output needs before it may be spent or reported
    #[serde(default = "default_min_confirmations")]
    pub min_confirmations: u32,

    /// Fee rate in smallest units per weight unit
    #[serde(default = "default_fee_rate")]
    pub fee_rate_per_weight: u64,

    /// Change below this value is folded into the fee (0 disables)
    #[serde(default = "default_dust_threshold")]
    pub dust_threshold: u64,

    /// Upper bound of a single craft, lock wait included
    #[serde(default = "default_rpc_timeout")]
    pub rpc_timeout_seconds: u64,

    /// Account change addresses are requested for
    #[serde(default)]
    pub change_account: String,

    /// Interval of the incoming payment watcher
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,
}

impl Default for BitcoindConfig {
    fn default() -> Self {
        Self {
            asset: default_asset(),
            network: default_network(),
            min_confirmations: default_min_confirmations(),
            fee_rate_per_weight: default_fee_rate(),
            dust_threshold: default_dust_threshold(),
            rpc_timeout_seconds: default_rpc_timeout(),
            change_account: String::new(),
            poll_interval_seconds: default_poll_interval(),
        }
    }
}

impl BitcoindConfig {
    /// The configured network as a `bitcoin::Network`
    pub fn network(&self) -> Result<Network> {
        parse_network(&self.network)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_seconds)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }
}

/// Settings of the lightning adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LndConfig {
    /// Public host announced to payers
    #[serde(default = "default_lnd_host")]
    pub host: String,

    /// Public peer port announced to payers
    #[serde(default = "default_lnd_port")]
    pub port: String,

    #[serde(default = "default_network")]
    pub network: String,

    /// Minimum payable amount in coin units
    #[serde(default = "default_min_amount")]
    pub min_amount: String,

    /// Maximum payable amount in coin units
    #[serde(default = "default_max_amount")]
    pub max_amount: String,

    /// Interval of the settled invoice poller
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,
}

impl Default for LndConfig {
    fn default() -> Self {
        Self {
            host: default_lnd_host(),
            port: default_lnd_port(),
            network: default_network(),
            min_amount: default_min_amount(),
            max_amount: default_max_amount(),
            poll_interval_seconds: default_poll_interval(),
        }
    }
}

impl LndConfig {
    pub fn network(&self) -> Result<Network> {
        parse_network(&self.network)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }
}

impl ConnectorConfig {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path.display(), e))?;

        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| anyhow!("Failed to parse config file: {}", e))
    }

    /// Save configuration to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| anyhow!("Failed to serialize config: {}", e))?;

        fs::write(path.as_ref(), content)
            .map_err(|e| anyhow!("Failed to write config file: {}", e))?;

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        parse_network(&self.bitcoind.network)?;
        parse_network(&self.lnd.network)?;

        if self.bitcoind.asset.trim().is_empty() {
            bail!("Invalid asset: must not be empty");
        }

        if self.bitcoind.rpc_timeout_seconds == 0 {
            bail!("Invalid RPC timeout: must be greater than 0");
        }

        if self.bitcoind.poll_interval_seconds == 0 || self.lnd.poll_interval_seconds == 0 {
            bail!("Invalid poll interval: must be greater than 0");
        }

        let min = math::parse_amount(&self.lnd.min_amount)
            .map_err(|e| anyhow!("Invalid lnd min_amount: {}", e))?;
        let max = math::parse_amount(&self.lnd.max_amount)
            .map_err(|e| anyhow!("Invalid lnd max_amount: {}", e))?;
        if min > max {
            bail!(
                "Invalid lnd amount range: min {} exceeds max {}",
                self.lnd.min_amount,
                self.lnd.max_amount
            );
        }

        Ok(())
    }
}

/// Parse a lowercase network name
pub fn parse_network(name: &str) -> Result<Network> {
    match name {
        "bitcoin" | "mainnet" => Ok(Network::Bitcoin),
        "testnet" => Ok(Network::Testnet),
        "signet" => Ok(Network::Signet),
        "regtest" => Ok(Network::Regtest),
        other => Network::from_str(other).map_err(|_| anyhow!("Invalid network type: {}", other)),
    }
}

/// Ensure a configuration file exists at the specified path
/// If it doesn't exist, create it with default values
pub fn ensure_config_exists(path: &Path) -> Result<()> {
    if !path.exists() {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)
                    .map_err(|e| anyhow!("Failed to create config directory: {}", e))?;
            }
        }

        ConnectorConfig::default().save(path)?;
        log_event(
            LogLevel::Info,
            LogContext::Config,
            &format!("created default config at {}", path.display()),
            None,
        );
    }

    Ok(())
}

// Default value functions

fn default_asset() -> String {
    "BTC".to_string()
}

fn default_network() -> String {
    "bitcoin".to_string()
}

fn default_min_confirmations() -> u32 {
    1
}

fn default_fee_rate() -> u64 {
    1
}

fn default_dust_threshold() -> u64 {
    crate::types::DUST_THRESHOLD
}

fn default_rpc_timeout() -> u64 {
    30
}

fn default_poll_interval() -> u64 {
    10
}

fn default_lnd_host() -> String {
    "localhost".to_string()
}

fn default_lnd_port() -> String {
    "9735".to_string()
}

fn default_min_amount() -> String {
    "0.00000001".to_string()
}

fn default_max_amount() -> String {
    "0.04294967".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config_is_valid() {
        let config = ConnectorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.bitcoind.min_confirmations, 1);
        assert_eq!(config.bitcoind.dust_threshold, 546);
        assert_eq!(config.bitcoind.rpc_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config = ConnectorConfig::from_toml(
            r#"
            [bitcoind]
            network = "regtest"
            min_confirmations = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.bitcoind.network().unwrap(), Network::Regtest);
        assert_eq!(config.bitcoind.min_confirmations, 3);
        assert_eq!(config.bitcoind.fee_rate_per_weight, 1);
        assert_eq!(config.lnd.port, "9735");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = ConnectorConfig::default();
        config.bitcoind.network = "moonnet".to_string();
        assert!(config.validate().is_err());

        let mut config = ConnectorConfig::default();
        config.bitcoind.rpc_timeout_seconds = 0;
        assert!(config.validate().is_err());

        let mut config = ConnectorConfig::default();
        config.lnd.min_amount = "1".to_string();
        config.lnd.max_amount = "0.5".to_string();
        assert!(config.validate().is_err());

        let mut config = ConnectorConfig::default();
        config.lnd.max_amount = "lots".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("connector.toml");

        let mut config = ConnectorConfig::default();
        config.bitcoind.asset = "LTC".to_string();
        config.bitcoind.change_account = "change".to_string();
        config.save(&path).unwrap();

        let loaded = ConnectorConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_ensure_config_exists_creates_directories() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("connector.toml");

        ensure_config_exists(&path).unwrap();
        assert!(path.exists());

        let loaded = ConnectorConfig::load(&path).unwrap();
        assert_eq!(loaded, ConnectorConfig::default());
    }
}
