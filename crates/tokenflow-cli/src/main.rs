//! CLI entry point for tokenflow.
//!
//! This binary provides the `tokenflow` command with subcommands for decoding
//! event streams and folding streamed JSON chunks.

mod cli;
mod commands;
mod config;
mod input;

use anyhow::Result;
use clap::Parser;
use tokenflow_stream::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};
use crate::config::CliConfig;

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = CliConfig::load(cli.config.as_deref())?;

    let level = cli.log_level.as_deref().unwrap_or(&config.log.level);
    init_tracing(level);

    match &cli.command {
        Commands::Decode(args) => {
            let cancel = CancellationToken::new();
            spawn_interrupt_handler(cancel.clone());
            commands::cmd_decode(args, &config, cancel, &mut std::io::stdout()).await
        }
        Commands::Merge { file } => commands::cmd_merge(file.as_deref(), &mut std::io::stdout()),
    }
}

/// Fire `cancel` on the first Ctrl-C.
fn spawn_interrupt_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("interrupt received, cancelling stream");
                cancel.cancel();
            }
            Err(e) => warn!(error = %e, "failed to listen for interrupt"),
        }
    });
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Initialize the tracing subscriber with env-filter support.
///
/// Logs go to stderr so decoded output on stdout stays machine-readable.
fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}
