//! Configuration management

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use etl_common::{EtlError, Result};

use crate::resolver::ResolveOptions;
use crate::value::{RawRecord, RawValue};

// ============================================================================
// Defaults
// ============================================================================

/// Records between two progress reports.
pub const DEFAULT_FEEDBACK_SIZE: u64 = 5000;

/// Default database URL for local development.
pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/etl";

/// Default maximum database connections in the pool.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 10;

/// Default minimum database connections in the pool.
pub const DEFAULT_DATABASE_MIN_CONNECTIONS: u32 = 1;

/// Default database connection timeout in seconds.
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default number of partitioned workers.
pub const DEFAULT_WORKERS: usize = 1;

/// How one batch is loaded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoadOptions {
    /// Overrides the derived key of the root entity; an empty list means
    /// every record is created
    pub persistence_key: Option<Vec<String>>,
    pub create: bool,
    pub update: bool,

    /// Values filled in for fields a record leaves absent or null
    pub defaults: BTreeMap<String, serde_json::Value>,

    /// Number of leading records to skip
    pub slice_begin: Option<u64>,
    /// Ordinal of the last record to process (1-based, inclusive)
    pub slice_end: Option<u64>,

    pub feedback_size: u64,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            persistence_key: None,
            create: true,
            update: true,
            defaults: BTreeMap::new(),
            slice_begin: None,
            slice_end: None,
            feedback_size: DEFAULT_FEEDBACK_SIZE,
        }
    }
}

impl LoadOptions {
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let options: LoadOptions = toml::from_str(source)?;
        options.validate()?;
        Ok(options)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_toml_str(&std::fs::read_to_string(path)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.feedback_size == 0 {
            return Err(EtlError::config("feedback_size must be greater than 0"));
        }
        if let (Some(begin), Some(end)) = (self.slice_begin, self.slice_end) {
            if begin >= end {
                return Err(EtlError::config(format!(
                    "slice_begin ({}) must be lower than slice_end ({})",
                    begin, end
                )));
            }
        }
        Ok(())
    }

    pub fn resolve_options(&self) -> ResolveOptions {
        ResolveOptions {
            persistence_key: self.persistence_key.clone(),
            create: self.create,
            update: self.update,
        }
    }

    pub fn defaults_record(&self) -> RawRecord {
        self.defaults
            .iter()
            .map(|(k, v)| (k.clone(), RawValue::from(v.clone())))
            .collect()
    }

    /// Whether the 1-based `ordinal` falls inside the slice window
    pub fn in_slice(&self, ordinal: u64) -> bool {
        ordinal > self.slice_begin.unwrap_or(0) && !self.past_slice(ordinal)
    }

    pub fn past_slice(&self, ordinal: u64) -> bool {
        self.slice_end.is_some_and(|end| ordinal > end)
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
    pub idle_timeout_secs: Option<u64>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_DATABASE_URL.to_string(),
            max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
            min_connections: DEFAULT_DATABASE_MIN_CONNECTIONS,
            connect_timeout_secs: DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
            idle_timeout_secs: None,
        }
    }
}

/// Loader configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EtlConfig {
    pub database: DatabaseConfig,
    pub load: LoadOptions,
    pub workers: usize,
}

fn parsed<T: std::str::FromStr>(value: Option<String>, name: &str) -> Result<Option<T>> {
    match value {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| EtlError::config(format!("{} has an invalid value '{}'", name, raw))),
    }
}

impl EtlConfig {
    /// Load configuration from the environment after reading `.env`
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build configuration from any variable source
    ///
    /// - `ETL_DATABASE_URL` (falls back to `DATABASE_URL`)
    /// - `ETL_DB_MAX_CONNECTIONS`, `ETL_DB_MIN_CONNECTIONS`
    /// - `ETL_DB_CONNECT_TIMEOUT`, `ETL_DB_IDLE_TIMEOUT` (seconds)
    /// - `ETL_FEEDBACK_SIZE`, `ETL_WORKERS`
    /// - `ETL_CREATE`, `ETL_UPDATE` (true/false)
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let mut config = EtlConfig {
            workers: DEFAULT_WORKERS,
            ..EtlConfig::default()
        };

        if let Some(url) = var("ETL_DATABASE_URL").or_else(|| var("DATABASE_URL")) {
            config.database.url = url;
        }
        if let Some(n) = parsed(var("ETL_DB_MAX_CONNECTIONS"), "ETL_DB_MAX_CONNECTIONS")? {
            config.database.max_connections = n;
        }
        if let Some(n) = parsed(var("ETL_DB_MIN_CONNECTIONS"), "ETL_DB_MIN_CONNECTIONS")? {
            config.database.min_connections = n;
        }
        if let Some(n) = parsed(var("ETL_DB_CONNECT_TIMEOUT"), "ETL_DB_CONNECT_TIMEOUT")? {
            config.database.connect_timeout_secs = n;
        }
        config.database.idle_timeout_secs = parsed(var("ETL_DB_IDLE_TIMEOUT"), "ETL_DB_IDLE_TIMEOUT")?;

        if let Some(n) = parsed(var("ETL_FEEDBACK_SIZE"), "ETL_FEEDBACK_SIZE")? {
            config.load.feedback_size = n;
        }
        if let Some(n) = parsed(var("ETL_WORKERS"), "ETL_WORKERS")? {
            config.workers = n;
        }
        if let Some(b) = parsed(var("ETL_CREATE"), "ETL_CREATE")? {
            config.load.create = b;
        }
        if let Some(b) = parsed(var("ETL_UPDATE"), "ETL_UPDATE")? {
            config.load.update = b;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.database.url.is_empty() {
            return Err(EtlError::config("Database URL cannot be empty"));
        }
        if self.database.max_connections == 0 {
            return Err(EtlError::config("Database max_connections must be greater than 0"));
        }
        if self.database.min_connections > self.database.max_connections {
            return Err(EtlError::config(format!(
                "Database min_connections ({}) cannot be greater than max_connections ({})",
                self.database.min_connections, self.database.max_connections
            )));
        }
        if self.workers == 0 {
            return Err(EtlError::config("workers must be greater than 0"));
        }
        if self.workers as u64 > u64::from(self.database.max_connections) {
            tracing::warn!(
                workers = self.workers,
                max_connections = self.database.max_connections,
                "More workers than pooled connections; workers will wait for connections"
            );
        }
        self.load.validate()
    }
}
