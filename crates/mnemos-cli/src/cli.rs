//! Clap CLI definitions for Mnemos.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub const AFTER_HELP: &str = "\
\x1b[1;36mExamples:\x1b[0m
  mnemos migrate                Create or update the schema
  mnemos status                 Backend, journal and record counts
  mnemos agents                 List stored agents
  mnemos delete-agent <ID> -y   Delete an agent and everything it owns
  mnemos config                 Show the effective configuration

\x1b[1;36mBackend selection:\x1b[0m
  MNEMOS_POSTGRES_URL / POSTGRES_URL   use Postgres + pgvector
  MNEMOS_DATA_DIR                      use the embedded database in this directory";

/// Mnemos: agent-memory storage operator tool.
#[derive(Parser)]
#[command(name = "mnemos", version, about = "Mnemos agent-memory store", after_help = AFTER_HELP)]
pub struct Cli {
    /// Path to config file (default ~/.mnemos/config.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Apply the schema to the configured backend.
    Migrate,
    /// Show backend health, applied schema modules and agent count.
    Status {
        /// Output as JSON for scripting.
        #[arg(long)]
        json: bool,
    },
    /// List agents.
    Agents {
        /// Output as JSON for scripting.
        #[arg(long)]
        json: bool,
    },
    /// Delete an agent and its whole ownership closure.
    DeleteAgent {
        /// Agent ID.
        id: uuid::Uuid,
        /// Skip the confirmation guard.
        #[arg(long, short = 'y')]
        yes: bool,
    },
    /// Show the effective configuration.
    Config {
        /// Output as JSON instead of TOML.
        #[arg(long)]
        json: bool,
    },
}
