//! Mnemos CLI: operator commands over the agent-memory store.
//!
//! Every command loads the storage configuration, opens (and migrates) the
//! selected backend, does its work and closes the connection again.

mod cli;
mod cmd;
pub mod table;
mod ui;

use crate::cli::{Cli, Commands};
use clap::Parser;
use mnemos_types::error::StoreError;

fn init_tracing_stderr() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// A suggestion printed under a failed command.
fn fix_for(err: &StoreError) -> &'static str {
    match err {
        StoreError::Transient(_) | StoreError::Timeout(_) => {
            "check that the database is reachable, then retry"
        }
        StoreError::Migration(_) | StoreError::Unsupported { .. } => {
            "the schema cannot be applied on this backend; check registered modules and the pgvector extension"
        }
        StoreError::Config(_) => "check ~/.mnemos/config.toml or pass --config",
        StoreError::Io(_) => "check permissions on the data directory (MNEMOS_DATA_DIR)",
        _ => "re-run with RUST_LOG=debug for details",
    }
}

fn main() {
    let cli = Cli::parse();
    init_tracing_stderr();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            ui::error_with_fix(&format!("failed to start runtime: {e}"), "check system resources");
            std::process::exit(1);
        }
    };

    let config = cli.config.as_deref();
    let result = runtime.block_on(async {
        match cli.command {
            Commands::Migrate => cmd::migrate::cmd_migrate(config).await.map(|_| true),
            Commands::Status { json } => cmd::status::cmd_status(config, json).await.map(|_| true),
            Commands::Agents { json } => cmd::agents::cmd_agents(config, json).await.map(|_| true),
            Commands::DeleteAgent { id, yes } => {
                cmd::agents::cmd_delete_agent(config, id, yes).await
            }
            Commands::Config { json } => cmd::config::cmd_config(config, json).map(|_| true),
        }
    });

    match result {
        Ok(true) => {}
        Ok(false) => std::process::exit(2),
        Err(e) => {
            ui::error_with_fix(&e.to_string(), fix_for(&e));
            std::process::exit(1);
        }
    }
}
