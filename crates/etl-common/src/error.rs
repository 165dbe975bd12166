//! Error types shared across etl-sync crates

use thiserror::Error;

/// Result type alias for loader-level operations
pub type Result<T> = std::result::Result<T, EtlError>;

/// Failures outside the per-record reconciliation path: reading files,
/// parsing configuration, building schemas.
#[derive(Error, Debug)]
pub enum EtlError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl EtlError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}
