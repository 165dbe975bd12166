//! etl-sync common library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared error handling and logging for the etl-sync workspace members.
//!
//! - **Error Handling**: [`EtlError`] and the [`Result`] alias used by file
//!   and configuration loaders
//! - **Logging**: [`logging::init_logging`] and its [`logging::LogConfig`]

pub mod error;
pub mod logging;

pub use error::{EtlError, Result};
