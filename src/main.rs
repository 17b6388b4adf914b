//! ruleset-sync - Rule list normalization and aggregation
//!
//! Syncs upstream domain and IP/CIDR lists, sanitizes them and merges them
//! into published artifacts.

use anyhow::Result;
use clap::Parser;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use ruleset_sync::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = if cli.verbose {
        Level::DEBUG
    } else if cli.quiet {
        Level::ERROR
    } else {
        Level::INFO
    };

    // Logs go to stderr so that `normalize` and `--json` output stay clean
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .without_time()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // Execute command
    match cli.command {
        Commands::Sync {
            sources,
            output,
            strict,
            json,
        } => ruleset_sync::commands::sync::run(&sources, &output, strict, json).await,
        Commands::Process { source, json } => {
            ruleset_sync::commands::process::run(&source, json).await
        }
        Commands::Merge {
            config,
            source,
            output,
            strict,
            json,
        } => ruleset_sync::commands::merge::run(&config, &source, &output, strict, json).await,
        Commands::Normalize { kind, file } => {
            ruleset_sync::commands::normalize::run(kind, file.as_deref()).await
        }
        Commands::Version => {
            println!("ruleset-sync {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
