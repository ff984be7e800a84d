//! Error types for the settle CLI.

use std::path::PathBuf;

use thiserror::Error;
use vendops_core::CoreError;

/// Configuration error types.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// `--config` pointed at a file that does not exist.
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// An environment override could not be parsed.
    #[error("Invalid value for {key}: '{value}'")]
    InvalidValue { key: String, value: String },

    /// The merged configuration failed validation.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Errors from one CLI run.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to read snapshot {path}: {source}")]
    ReadSnapshot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Engine(#[from] CoreError),

    #[error("Failed to serialize result: {0}")]
    Output(#[from] serde_json::Error),
}

pub type CliResult<T> = Result<T, CliError>;
