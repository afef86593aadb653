//! Structured error types for dbrelay-core.
//!
//! Library consumers get `thiserror` enums they can match on; the
//! `dbrelay` binary wraps them in `anyhow` with context.

use std::path::PathBuf;
use thiserror::Error;

/// A raw notification payload could not be turned into a `ChangeEvent`.
#[derive(Error, Debug)]
pub enum PayloadError {
    /// Payload is not valid JSON, or not a JSON object
    #[error("payload is not a JSON object: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },

    /// Required field missing from the payload
    #[error("missing required field '{field}'")]
    MissingField { field: &'static str },

    /// `operation` was present but not insert/update/delete
    #[error("unknown operation '{value}'")]
    UnknownOperation { value: String },
}

/// Configuration could not be loaded or failed validation.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("failed to read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Config file is not valid TOML for `RelayConfig`
    #[error("failed to parse config file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    /// An environment override could not be parsed
    #[error("invalid value for {var}: {reason}")]
    Env { var: &'static str, reason: String },

    /// A value parsed but is not usable
    #[error("invalid configuration: {field} {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },

    /// No database URL could be determined
    #[error("database URL not set (use --database-url, DATABASE_URL or PSQL_DB_USER/PSQL_DB_PASSWORD)")]
    MissingDatabaseUrl,
}

impl ConfigError {
    pub(crate) fn env(var: &'static str, reason: impl ToString) -> Self {
        Self::Env {
            var,
            reason: reason.to_string(),
        }
    }
}
