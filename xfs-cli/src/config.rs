//! Configuration for `xfsctl`.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use xfs_core::ProxyConfig;

/// Why a config file could not be used.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config: {0}")]
    Read(#[from] std::io::Error),
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// The device to drive.
    pub device: ProxyConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level or filter directive: "warn", "xfs_core=debug", ...
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl CliConfig {
    /// Load configuration from a TOML file. A missing file yields the
    /// defaults; an unreadable or invalid one is an error the caller can
    /// report once logging is up.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(contents) => Ok(Self::parse(&contents)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(ConfigError::Read(e)),
        }
    }

    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// The default configuration as TOML, for `--gen-config`.
    pub fn default_toml() -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(&Self::default())
    }
}

// ── Tests ────────────────────────────────────────────────────────
