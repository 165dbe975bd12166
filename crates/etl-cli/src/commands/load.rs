//! `etl-sync load` command implementation
//!
//! Reads a delimited file and resolves every row against the store.

use chrono::Local;
use colored::Colorize;
use etl_core::batch::{BatchReport, BatchRunner};
use etl_core::config::{EtlConfig, LoadOptions};
use etl_core::source::{DelimitedOptions, DelimitedSource};
use etl_core::store::{create_pool, MemoryStore, PgStore, Store};
use etl_core::{InstanceResolver, SchemaRegistry};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::{CliError, Result};
use crate::progress::{create_spinner, format_stats, ProgressSink};
use crate::reject_log;
use crate::LoadArgs;

/// Merge the options file (or the environment) with command line flags
pub fn load_options(args: &LoadArgs, config: &EtlConfig) -> Result<LoadOptions> {
    let mut options = match args.options {
        Some(ref path) => LoadOptions::from_path(path)?,
        None => config.load.clone(),
    };

    if args.always_create {
        options.persistence_key = Some(Vec::new());
    } else if let Some(ref key) = args.key {
        options.persistence_key = Some(key.clone());
    }
    if args.no_create {
        options.create = false;
    }
    if args.no_update {
        options.update = false;
    }
    if args.begin.is_some() {
        options.slice_begin = args.begin;
    }
    if args.end.is_some() {
        options.slice_end = args.end;
    }
    if let Some(size) = args.feedback_size {
        options.feedback_size = size;
    }
    for pair in &args.defaults {
        let (name, value) = pair
            .split_once('=')
            .ok_or_else(|| CliError::invalid_argument(format!("default '{}' is not NAME=VALUE", pair)))?;
        options
            .defaults
            .insert(name.trim().to_string(), serde_json::Value::String(value.to_string()));
    }

    options.validate()?;
    Ok(options)
}

/// Reader settings from the command line
pub fn delimited_options(args: &LoadArgs) -> Result<DelimitedOptions> {
    if !args.delimiter.is_ascii() {
        return Err(CliError::invalid_argument(format!(
            "delimiter '{}' must be a single ASCII character",
            args.delimiter
        )));
    }
    Ok(DelimitedOptions {
        delimiter: args.delimiter as u8,
        quoting: args.quoting,
        has_header: !args.no_header,
        field_names: args.fields.clone(),
    })
}

/// Load `args.input`
pub async fn run(args: LoadArgs) -> Result<()> {
    let mut config = EtlConfig::load()?;
    if let Some(ref url) = args.database_url {
        config.database.url = url.clone();
    }
    if let Some(workers) = args.workers {
        config.workers = workers;
    }
    config.validate()?;

    let options = load_options(&args, &config)?;
    let schema = Arc::new(SchemaRegistry::from_path(&args.schema)?);
    let resolver = Arc::new(InstanceResolver::new(schema));

    let cancel = CancellationToken::new();
    let runner = BatchRunner::new(resolver, args.entity.clone(), options).with_cancellation(cancel.clone());
    runner.preflight()?;

    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping after the current record");
            signal_token.cancel();
        }
    });

    let source = DelimitedSource::open(&args.input, &delimited_options(&args)?)?;
    let mut sink = ProgressSink::new(create_spinner(&format!("loading {}", args.input.display())));

    let report = if args.dry_run {
        println!("{} Dry run, nothing is written", "→".cyan());
        let store = MemoryStore::new();
        if config.workers > 1 {
            let stores: Vec<Box<dyn Store>> = (0..config.workers)
                .map(|_| Box::new(store.clone()) as Box<dyn Store>)
                .collect();
            runner.run_partitioned(stores, source, &mut sink).await?
        } else {
            let mut store = store;
            runner.run(&mut store, source, &mut sink).await?
        }
    } else {
        let pool = create_pool(&config.database).await?;
        if config.workers > 1 {
            let mut stores: Vec<Box<dyn Store>> = Vec::with_capacity(config.workers);
            for _ in 0..config.workers {
                stores.push(Box::new(PgStore::acquire(&pool).await?));
            }
            runner.run_partitioned(stores, source, &mut sink).await?
        } else {
            let mut store = PgStore::acquire(&pool).await?;
            runner.run(&mut store, source, &mut sink).await?
        }
    };
    sink.finish(&report.stats);

    let log_path = args
        .reject_log
        .clone()
        .unwrap_or_else(|| reject_log::default_path(&args.input, Local::now().date_naive()));
    let written = reject_log::write(&log_path, &report.rejected)?;

    print_summary(&args, &report);
    if written > 0 {
        println!("  Rejected records written to {}", log_path.display());
    }
    Ok(())
}

fn print_summary(args: &LoadArgs, report: &BatchReport) {
    let stats = &report.stats;
    let marker = if report.cancelled {
        "!".yellow()
    } else if stats.rejected > 0 {
        "✓".yellow()
    } else {
        "✓".green()
    };
    println!(
        "{} {}: {} records processed in {:.1}s",
        marker,
        args.input.display(),
        stats.total,
        stats.duration_secs
    );
    println!("  {}", format_stats(stats));
    if report.cancelled {
        println!("  {}", "Load was interrupted before the end of the file".yellow());
    }
}
