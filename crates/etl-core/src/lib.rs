//! etl-sync core library
#![deny(clippy::unwrap_used, clippy::expect_used)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]
//!
//! Reconciles loosely-typed input records against a relational store:
//! every record is coerced to the target schema, its related rows are
//! resolved (and created on demand), and the record itself is inserted,
//! updated or left alone depending on whether its persistence key already
//! matches a stored row.
//!
//! # Layout
//!
//! - [`schema`]: entity definitions, the registry and persistence keys
//! - [`coerce`]: per-kind raw value conversion
//! - [`reconcile`]: matching a record against stored rows
//! - [`resolver`]: create-or-update decisions and relation handling
//! - [`batch`]: running a whole row source, with cancellation and
//!   partitioned workers
//! - [`source`]: delimited text input
//! - [`store`]: the store trait, an in-memory store and PostgreSQL
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use etl_core::batch::{BatchRunner, TracingSink};
//! use etl_core::config::LoadOptions;
//! use etl_core::resolver::InstanceResolver;
//! use etl_core::schema::SchemaRegistry;
//! use etl_core::source::{DelimitedOptions, DelimitedSource};
//! use etl_core::store::MemoryStore;
//!
//! # async fn load() -> anyhow::Result<()> {
//! let schema = Arc::new(SchemaRegistry::from_path("schema.toml")?);
//! let resolver = Arc::new(InstanceResolver::new(schema));
//! let runner = BatchRunner::new(resolver, "Person", LoadOptions::default());
//!
//! let source = DelimitedSource::open("people.tsv", &DelimitedOptions::default())?;
//! let mut store = MemoryStore::new();
//! let report = runner.run(&mut store, source, &mut TracingSink).await?;
//! println!("{} created", report.stats.created);
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod coerce;
pub mod config;
pub mod error;
pub mod geometry;
pub mod partition;
pub mod reconcile;
pub mod resolver;
pub mod schema;
pub mod source;
pub mod store;
pub mod value;

pub use batch::{BatchReport, BatchRunner, BatchStats, OutcomeSink, TracingSink};
pub use config::{EtlConfig, LoadOptions};
pub use error::{BatchError, ResolveError, SchemaError, SourceError, StoreError};
pub use resolver::{InstanceResolver, Outcome, Resolution, ResolveInput, ResolveOptions};
pub use schema::{EntityDefinition, FieldDefinition, FieldKind, SchemaRegistry};
pub use store::{MemoryStore, PgStore, Store};
pub use value::{RawRecord, RawValue, RowRef, Value};
