//! Player settings resolution
//!
//! # Settings Sources Priority
//!
//! 1. Command-line arguments (`--device`, `--mmap`, `--noresample`, `--verbose`)
//! 2. Environment variables (`PCMFLOW_DEVICE`, read by the argument parser)
//! 3. TOML configuration file
//! 4. Built-in defaults
//!
//! The merged result is validated once and then passed by value to the
//! session; nothing here is global.

use crate::engine::{NegotiationHints, RecoveryPolicy};
use crate::error::Result;
use pcmflow_common::config::PlayerConfig;
use pcmflow_common::TransferMode;
use std::path::Path;
use tracing::debug;

/// Values supplied on the command line (or its environment fallbacks)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigOverrides {
    pub device: Option<String>,
    pub transfer: Option<TransferMode>,
    pub allow_resample: Option<bool>,
    pub log_level: Option<String>,
}

/// Fully resolved player settings
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub device: String,
    pub hints: NegotiationHints,
    pub recovery: RecoveryPolicy,
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        // Built-in defaults always validate
        Self::from_config(&PlayerConfig::default())
    }
}

impl Settings {
    /// Load the TOML file (explicit path or platform default) and merge overrides.
    ///
    /// # Errors
    /// `Configuration` if the file is unreadable or any merged value is invalid.
    pub fn resolve(config_path: Option<&Path>, overrides: &ConfigOverrides) -> Result<Self> {
        let config = PlayerConfig::resolve(config_path)?;
        Self::merge(config, overrides)
    }

    /// Apply overrides on top of `config` and validate the result.
    pub fn merge(mut config: PlayerConfig, overrides: &ConfigOverrides) -> Result<Self> {
        if let Some(device) = &overrides.device {
            debug!("Device override: {}", device);
            config.device = device.clone();
        }
        if let Some(transfer) = overrides.transfer {
            config.transfer = transfer;
        }
        if let Some(allow) = overrides.allow_resample {
            config.allow_resample = allow;
        }
        if let Some(level) = &overrides.log_level {
            config.logging.level = level.clone();
        }
        config.validate()?;
        Ok(Self::from_config(&config))
    }

    fn from_config(config: &PlayerConfig) -> Self {
        Self {
            device: config.device.clone(),
            hints: NegotiationHints::from(config),
            recovery: RecoveryPolicy::from(&config.recovery),
            log_level: config.logging.level.clone(),
        }
    }
}
