//! Configuration file support for ulink CLI tools

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use ulink_protocol::LinkConfig;
use ulink_transfer::pacing::DEFAULT_DDT;
use ulink_transfer::wire::MAX_MTU;
use ulink_transfer::TransferParams;

/// Transfer section of the configuration file
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Proposed chunk size; 0 leaves it to the peer
    pub mtu: u16,
    /// Proposed minimum chunk interval in milliseconds
    pub dt_min: u32,
    /// Proposed maximum chunk interval in milliseconds
    pub dt_max: u32,
    /// Pacing step (sender only)
    pub ddt: u32,
}

impl Default for TransferConfig {
    fn default() -> Self {
        let params = TransferParams::default();
        TransferConfig {
            mtu: params.mtu,
            dt_min: params.dt_min,
            dt_max: params.dt_max,
            ddt: DEFAULT_DDT,
        }
    }
}

impl TransferConfig {
    pub fn params(&self) -> TransferParams {
        TransferParams::new(self.mtu, self.dt_min, self.dt_max)
    }
}

/// Combined configuration
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Link engine settings
    pub link: LinkConfig,
    /// Transfer proposal
    pub transfer: TransferConfig,
    /// Progress report interval in seconds, 0 disables
    pub stats_interval_secs: u64,
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Load `path` if given, defaults otherwise
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Config::default()),
        }
    }

    /// Reject settings the protocol cannot honor
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.transfer.mtu > MAX_MTU {
            return Err(ConfigError::Invalid(format!(
                "mtu {} exceeds {}",
                self.transfer.mtu, MAX_MTU
            )));
        }
        if self.transfer.dt_max != 0 && self.transfer.dt_max < self.transfer.dt_min {
            return Err(ConfigError::Invalid(format!(
                "dt_max {} below dt_min {}",
                self.transfer.dt_max, self.transfer.dt_min
            )));
        }
        if self.link.backoff.delay(0) == 0 {
            return Err(ConfigError::Invalid("retry delay must be positive".into()));
        }
        Ok(())
    }

    /// Get statistics interval as Duration
    pub fn stats_interval(&self) -> Option<Duration> {
        (self.stats_interval_secs > 0).then(|| Duration::from_secs(self.stats_interval_secs))
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
