//! Error types for the etl-sync CLI
//!
//! Messages are user facing and say what to check next.

use etl_core::{BatchError, SchemaError, StoreError};
use thiserror::Error;

/// Result type alias for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;

#[derive(Error, Debug)]
pub enum CliError {
    /// Configuration, schema or input file could not be loaded
    #[error("{0}")]
    Etl(#[from] etl_common::EtlError),

    /// Schema cannot be used for the requested entity
    #[error("Schema error: {0}. Fix the schema file or pass --key.")]
    Schema(#[from] SchemaError),

    /// Database could not be reached
    #[error("Database error: {0}. Check ETL_DATABASE_URL and that the server is running.")]
    Store(#[from] StoreError),

    /// Batch stopped before finishing
    #[error("Load aborted: {0}")]
    Batch(#[from] BatchError),

    /// File system operation failed
    #[error("File operation failed: {0}. Check file permissions and disk space.")]
    Io(#[from] std::io::Error),

    /// JSON serialization failed
    #[error("Failed to write JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Command line values that cannot be used together or parsed
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl CliError {
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_error_suggests_key() {
        let err: CliError = SchemaError::AmbiguousSchema {
            entity: "TwoUnique".to_string(),
            fields: vec!["a".to_string(), "b".to_string()],
        }
        .into();
        let message = err.to_string();
        assert!(message.contains("TwoUnique"));
        assert!(message.contains("--key"));
    }
}
