//! etl-sync CLI library
//!
//! Command-line front end for loading delimited files into a database
//! through the etl-core reconciliation engine.
//!
//! - **Loading**: resolve every row of a file against the store (`etl-sync load`)
//! - **Schema checks**: validate a schema file and show persistence keys
//!   (`etl-sync check`)

pub mod commands;
pub mod error;
pub mod progress;
pub mod reject_log;

pub use error::{CliError, Result};

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// etl-sync - reconcile delimited files with a relational store
#[derive(Parser, Debug)]
#[command(name = "etl-sync")]
#[command(author, version, about, long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Load a delimited file into the store
    Load(LoadArgs),

    /// Validate a schema file and print each entity's persistence key
    Check {
        /// Schema file (TOML)
        schema: PathBuf,

        /// Also check every entity a load of this root entity can touch
        #[arg(short, long)]
        entity: Option<String>,

        /// Persistence key override for the root entity (comma separated)
        #[arg(short, long, value_delimiter = ',', requires = "entity")]
        key: Option<Vec<String>>,
    },
}

#[derive(Args, Debug, Clone)]
pub struct LoadArgs {
    /// Delimited input file
    pub input: PathBuf,

    /// Schema file (TOML)
    #[arg(short, long)]
    pub schema: PathBuf,

    /// Root entity every row is loaded as
    #[arg(short, long)]
    pub entity: String,

    /// Load options file (TOML); command line flags take precedence
    #[arg(short, long)]
    pub options: Option<PathBuf>,

    /// Persistence key override (comma separated field names)
    #[arg(short, long, value_delimiter = ',', conflicts_with = "always_create")]
    pub key: Option<Vec<String>>,

    /// Never match existing rows; every record is created
    #[arg(long)]
    pub always_create: bool,

    /// Reject records that match no existing row
    #[arg(long)]
    pub no_create: bool,

    /// Leave matched rows untouched
    #[arg(long)]
    pub no_update: bool,

    /// Number of leading records to skip
    #[arg(long)]
    pub begin: Option<u64>,

    /// Last record to load (1-based, inclusive)
    #[arg(long)]
    pub end: Option<u64>,

    /// Records between progress reports
    #[arg(long)]
    pub feedback_size: Option<u64>,

    /// Default field value, as NAME=VALUE (repeatable)
    #[arg(short = 'D', long = "default", value_name = "NAME=VALUE")]
    pub defaults: Vec<String>,

    /// Field delimiter
    #[arg(short, long, default_value_t = '\t')]
    pub delimiter: char,

    /// Honour double-quote quoting
    #[arg(long)]
    pub quoting: bool,

    /// The file has no header row; requires --fields
    #[arg(long, requires = "fields")]
    pub no_header: bool,

    /// Field names, comma separated
    #[arg(long, value_delimiter = ',')]
    pub fields: Option<Vec<String>>,

    /// Number of partitioned workers
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Database URL (overrides ETL_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Resolve against an in-memory store; nothing is written
    #[arg(long)]
    pub dry_run: bool,

    /// Rejected-record log (defaults to <input>.<date>.log)
    #[arg(long)]
    pub reject_log: Option<PathBuf>,
}
