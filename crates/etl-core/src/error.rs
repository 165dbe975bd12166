//! Error taxonomy for schema building, row sources, stores and resolution

use thiserror::Error;

/// Entity definitions that cannot be used. Raised while the registry is
/// built or before a batch starts, never for an individual record.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("Unknown entity '{0}'")]
    UnknownEntity(String),

    #[error("Entity '{0}' is defined more than once")]
    DuplicateEntity(String),

    #[error("Entity '{entity}' declares field '{field}' more than once")]
    DuplicateField { entity: String, field: String },

    #[error("Entity '{entity}' has no field '{field}'")]
    UnknownField { entity: String, field: String },

    #[error("Relationship '{entity}.{relationship}' is invalid: {reason}")]
    InvalidRelationship {
        entity: String,
        relationship: String,
        reason: String,
    },

    #[error(
        "Failure to identify an unambiguous persistence key for '{entity}': \
         unique fields {fields:?} and no unique combination"
    )]
    AmbiguousSchema { entity: String, fields: Vec<String> },
}

impl From<SchemaError> for etl_common::EtlError {
    fn from(err: SchemaError) -> Self {
        etl_common::EtlError::Schema(err.to_string())
    }
}

/// Per-row failures reported by a row source
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    #[error("Text decoding error in line {line}: {message}")]
    Decode { line: u64, message: String },

    #[error("Malformed row in line {line}: {message}")]
    Malformed { line: u64, message: String },
}

/// Store access failures
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Row {entity}#{id} not found")]
    RowNotFound { entity: String, id: i64 },

    #[error("Constraint violation on '{entity}': {message}")]
    Constraint { entity: String, message: String },

    #[error("Transaction error: {0}")]
    Transaction(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Failures while resolving one record. Everything except `Schema` is
/// confined to the record and ends up as a rejection.
#[derive(Error, Debug)]
pub enum ResolveError {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("Double entry found for {entity} with persistence key {key:?} ({matches} rows)")]
    AmbiguousMatch {
        entity: String,
        key: Vec<String>,
        matches: usize,
    },

    #[error("Invalid value for {entity}.{field}: {reason}")]
    InvalidValue {
        entity: String,
        field: String,
        reason: String,
    },

    #[error("{entity} with id {id} does not exist")]
    NotFound { entity: String, id: i64 },

    #[error("Unsupported input for {entity}: {reason}")]
    UnsupportedInput { entity: String, reason: String },

    #[error("Related {entity} for '{relationship}' could not be resolved")]
    UnresolvedReference { entity: String, relationship: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ResolveError {
    /// Schema problems abort a batch; everything else rejects one record.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ResolveError::Schema(_))
    }

    pub(crate) fn invalid_value(
        entity: &str,
        field: &str,
        reason: impl Into<String>,
    ) -> Self {
        ResolveError::InvalidValue {
            entity: entity.to_string(),
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn unsupported(entity: &str, reason: impl Into<String>) -> Self {
        ResolveError::UnsupportedInput {
            entity: entity.to_string(),
            reason: reason.into(),
        }
    }
}

/// Failures that stop a whole batch
#[derive(Error, Debug)]
pub enum BatchError {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("Worker {worker} failed: {message}")]
    Worker { worker: usize, message: String },
}
