//! # Settle Configuration
//!
//! Engine tunables for the CLI.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     VENDOPS_VARIANCE_THRESHOLD_CENTS=5                                 │
//! │     VENDOPS_MAX_TRANSACTIONS=1000000                                   │
//! │                                                                         │
//! │  2. TOML Config File (--config, or the platform default)               │
//! │     ~/.config/vendops/settle.toml (Linux)                              │
//! │     ~/Library/Application Support/com.vendops.vendops/settle.toml      │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # settle.toml
//! [engine]
//! variance_threshold_cents = 1
//! max_transactions = 5000000   # 0 = unlimited
//! time_limit_ms = 0            # 0 = unlimited
//! chunk_size = 10000
//!
//! [output]
//! pretty = true
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use vendops_core::{Budget, EngineOptions};

use crate::error::ConfigError;

/// Name of the config file inside the platform config directory.
pub const CONFIG_FILE_NAME: &str = "settle.toml";

// =============================================================================
// Sections
// =============================================================================

/// `[engine]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Rows with `|var_fees|` above this many cents are flagged.
    pub variance_threshold_cents: i64,
    /// Largest snapshot accepted (0 = unlimited).
    pub max_transactions: u64,
    /// Wall-clock limit per run in milliseconds (0 = unlimited).
    pub time_limit_ms: u64,
    /// Transactions folded between time-limit checks.
    pub chunk_size: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        let defaults = EngineOptions::default();
        EngineSettings {
            variance_threshold_cents: defaults.variance_threshold_cents,
            max_transactions: 5_000_000,
            time_limit_ms: 0,
            chunk_size: defaults.chunk_size,
        }
    }
}

/// `[output]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    /// Pretty-print JSON results.
    pub pretty: bool,
}

impl Default for OutputSettings {
    fn default() -> Self {
        OutputSettings { pretty: true }
    }
}

// =============================================================================
// SettleConfig
// =============================================================================

/// Complete CLI configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettleConfig {
    #[serde(default)]
    pub engine: EngineSettings,

    #[serde(default)]
    pub output: OutputSettings,
}

impl SettleConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (an explicit path must exist; the default may not)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let mut config = match config_path {
            Some(path) if !path.exists() => return Err(ConfigError::NotFound(path)),
            Some(path) => Self::from_file(&path)?,
            None => match Self::default_config_path() {
                Some(path) if path.exists() => Self::from_file(&path)?,
                path => {
                    debug!(?path, "Config file not found, using defaults");
                    Self::default()
                }
            },
        };

        config.apply_env_overrides()?;
        config.validate()?;

        Ok(config)
    }

    /// Parses a config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        info!(?path, "Loading settle config from file");
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.variance_threshold_cents < 0 {
            return Err(ConfigError::Invalid(
                "variance_threshold_cents must not be negative".into(),
            ));
        }

        if self.engine.chunk_size == 0 {
            return Err(ConfigError::Invalid(
                "chunk_size must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Applies `VENDOPS_*` environment variable overrides.
    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Applies overrides from any key lookup.
    fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = parse_override(&lookup, "VENDOPS_VARIANCE_THRESHOLD_CENTS")? {
            debug!(value, "Overriding variance threshold from environment");
            self.engine.variance_threshold_cents = value;
        }

        if let Some(value) = parse_override(&lookup, "VENDOPS_MAX_TRANSACTIONS")? {
            self.engine.max_transactions = value;
        }

        if let Some(value) = parse_override(&lookup, "VENDOPS_TIME_LIMIT_MS")? {
            self.engine.time_limit_ms = value;
        }

        if let Some(value) = parse_override(&lookup, "VENDOPS_CHUNK_SIZE")? {
            self.engine.chunk_size = value;
        }

        if let Some(value) = parse_override(&lookup, "VENDOPS_PRETTY")? {
            self.output.pretty = value;
        }

        Ok(())
    }

    /// Returns the default config file path.
    pub fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "vendops", "vendops")
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
    }

    /// The engine options described by `[engine]`.
    pub fn engine_options(&self) -> EngineOptions {
        let max_transactions = match self.engine.max_transactions {
            0 => None,
            n => Some(usize::try_from(n).unwrap_or(usize::MAX)),
        };
        let time_limit = match self.engine.time_limit_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        };

        EngineOptions {
            variance_threshold_cents: self.engine.variance_threshold_cents,
            chunk_size: self.engine.chunk_size,
            budget: Budget {
                max_transactions,
                time_limit,
            },
        }
    }
}

fn parse_override<T, F>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value,
            }),
    }
}
