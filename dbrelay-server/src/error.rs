//! Error types for dbrelay-server

use dbrelay_core::ConfigError;
use thiserror::Error;

use crate::coordinator::CoordinatorError;

pub type Result<T> = std::result::Result<T, ServerError>;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("change relay error: {0}")]
    Relay(#[from] CoordinatorError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraps_sources_with_context() {
        let err = ServerError::from(ConfigError::MissingDatabaseUrl);
        assert!(err.to_string().starts_with("configuration error: "));

        let err = ServerError::from(CoordinatorError::AlreadyStarted);
        assert_eq!(err.to_string(), "change relay error: change relay already started");
    }
}
