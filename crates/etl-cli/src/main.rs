//! etl-sync CLI - Main entry point

use clap::Parser;
use etl_cli::{Cli, Commands};
use etl_common::logging::{init_logging, LogConfig, LogLevel, LogOutput};
use std::process;
use tracing::error;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Verbose mode logs every outcome; otherwise progress and rejections
    let log_config = LogConfig::builder()
        .level(if cli.verbose { LogLevel::Debug } else { LogLevel::Info })
        .output(LogOutput::Console)
        .log_file_prefix("etl-sync")
        .build();

    // Environment variables take precedence
    let log_config = log_config.merge_env().unwrap_or_else(|_| LogConfig::default());

    // The CLI works without logging
    let _guard = init_logging(&log_config).ok();

    if let Err(e) = execute_command(cli).await {
        error!(error = %e, "Command failed");
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

/// Execute the CLI command
async fn execute_command(cli: Cli) -> etl_cli::Result<()> {
    match cli.command {
        Commands::Load(args) => etl_cli::commands::load::run(args).await,
        Commands::Check { schema, entity, key } => {
            etl_cli::commands::check::run(&schema, entity.as_deref(), key.as_deref())
        }
    }
}
