//! Configuration file loading
//!
//! The TOML file is bootstrap-only: it is read once at startup, merged with
//! command-line overrides by the player, and then passed around as a value.
//!
//! # File Location Priority
//!
//! 1. Explicit path (`--config`)
//! 2. `<config_dir>/pcmflow/config.toml` if it exists
//! 3. Built-in defaults (no file)

use crate::format::TransferMode;
use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Upper bound on the device buffer duration (bounds playback latency)
pub const MAX_BUFFER_MS_CEILING: u32 = 500;

/// Player configuration loaded from TOML
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlayerConfig {
    /// Playback device name ("default", a device name, or "null")
    #[serde(default = "default_device")]
    pub device: String,

    /// Transfer method
    #[serde(default)]
    pub transfer: TransferMode,

    /// Let the device resample when it cannot run at the stream rate
    #[serde(default = "default_allow_resample")]
    pub allow_resample: bool,

    /// Ceiling for the negotiated buffer duration in milliseconds (1..=500)
    #[serde(default = "default_max_buffer_ms")]
    pub max_buffer_ms: u32,

    /// Device fault recovery budget
    #[serde(default)]
    pub recovery: RecoveryConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Recovery budget configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RecoveryConfig {
    /// Consecutive recoveries of one condition before the session faults
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Interval between resume attempts of a suspended device
    #[serde(default = "default_suspend_poll_ms")]
    pub suspend_poll_ms: u64,

    /// Resume attempts before falling back to re-preparing the device
    #[serde(default = "default_suspend_max_polls")]
    pub suspend_max_polls: u32,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_device() -> String {
    "default".to_string()
}

fn default_allow_resample() -> bool {
    true
}

fn default_max_buffer_ms() -> u32 {
    MAX_BUFFER_MS_CEILING
}

fn default_max_retries() -> u32 {
    8
}

fn default_suspend_poll_ms() -> u64 {
    1000
}

fn default_suspend_max_polls() -> u32 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            suspend_poll_ms: default_suspend_poll_ms(),
            suspend_max_polls: default_suspend_max_polls(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            device: default_device(),
            transfer: TransferMode::default(),
            allow_resample: default_allow_resample(),
            max_buffer_ms: default_max_buffer_ms(),
            recovery: RecoveryConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl PlayerConfig {
    /// Parse configuration from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: PlayerConfig = toml::from_str(text)
            .map_err(|e| Error::Config(format!("Failed to parse TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    /// - File cannot be read
    /// - TOML cannot be parsed or contains unknown keys
    /// - A value is out of range
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        let config = Self::from_toml_str(&text)?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Load from an explicit path, else the platform default path, else defaults.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        match default_config_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => {
                debug!("No configuration file found, using built-in defaults");
                Ok(Self::default())
            }
        }
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<()> {
        if self.device.trim().is_empty() {
            return Err(Error::Config("device name must not be empty".to_string()));
        }
        if self.max_buffer_ms == 0 || self.max_buffer_ms > MAX_BUFFER_MS_CEILING {
            return Err(Error::Config(format!(
                "max_buffer_ms must be in 1..={} (got {})",
                MAX_BUFFER_MS_CEILING, self.max_buffer_ms
            )));
        }
        if self.recovery.suspend_poll_ms == 0 {
            return Err(Error::Config("recovery.suspend_poll_ms must be non-zero".to_string()));
        }
        Ok(())
    }
}

/// Platform default configuration file path (`<config_dir>/pcmflow/config.toml`)
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("pcmflow").join("config.toml"))
}
