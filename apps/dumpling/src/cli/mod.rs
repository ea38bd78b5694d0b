//! # Dumpling CLI Module
//!
//! This module implements the CLI interface for dumpling.
//!
//! ## Available Commands
//!
//! - `init` - Initialize a new database
//! - `ingest` - Ingest raw dump files
//! - `buckets` - List active buckets in a window
//! - `dumps` - List the dumps of a bucket
//! - `properties` - Show the properties of a dump as JSON
//! - `dashboard` - Buckets × dumps × properties for the trailing window
//! - `status` - Show store counts

mod commands;

use clap::{Parser, Subcommand};
use dumpling_core::TriageError;
use std::path::PathBuf;
use thiserror::Error;

use crate::config::{AppConfig, Backend};

pub use commands::*;

// =============================================================================
// ERRORS
// =============================================================================

/// Errors surfaced by the command-line adapter.
#[derive(Debug, Error)]
pub enum CliError {
    /// An engine error, passed through unchanged.
    #[error(transparent)]
    Triage(#[from] TriageError),

    /// The configuration file could not be read or parsed.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A file could not be read or written.
    #[error("I/O error: {0}")]
    Io(String),

    /// An argument value was not understood.
    #[error("Invalid argument: {0}")]
    Usage(String),

    /// Some inputs of a multi-file command failed.
    #[error("{failed} of {total} dumps failed to ingest")]
    Partial { failed: usize, total: usize },
}

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// dumpling - crash dump triage
///
/// Groups crash dumps into buckets by signature and answers the queries a
/// triage dashboard needs.
#[derive(Parser, Debug)]
#[command(name = "dumpling")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress per-item progress output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to the triage database (overrides the config file)
    #[arg(short = 'D', long, global = true)]
    pub database: Option<PathBuf>,

    /// Storage backend (overrides the config file)
    #[arg(short = 'B', long, global = true, value_enum)]
    pub backend: Option<Backend>,

    /// Configuration file (default: ./dumpling.toml if present)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI commands.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Initialize a new empty database
    Init {
        /// Force initialization even if database exists
        #[arg(short, long)]
        force: bool,
    },

    /// Ingest raw dump files
    Ingest {
        /// Dump files (JSON or `Key: Value` text)
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Input format (auto, json, text)
        #[arg(short = 't', long, default_value = "auto")]
        format: String,
    },

    /// List buckets updated within a window
    Buckets {
        /// Window start (RFC 3339, inclusive)
        #[arg(long, requires = "to")]
        from: Option<String>,

        /// Window end (RFC 3339, exclusive)
        #[arg(long, requires = "from")]
        to: Option<String>,

        /// Trailing window in days (default from config)
        #[arg(long, conflicts_with_all = ["from", "to"])]
        days: Option<i64>,
    },

    /// List the dumps of a bucket
    Dumps {
        /// Bucket identifier
        bucket: String,
    },

    /// Show the properties of a dump as JSON
    Properties {
        /// Dump identifier
        dump: String,
    },

    /// Show the dashboard for the trailing window
    Dashboard {
        /// Trailing window in days (default from config)
        #[arg(long)]
        days: Option<i64>,
    },

    /// Show store status
    Status,
}

/// Output switches shared by every command.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Output {
    pub json: bool,
    pub quiet: bool,
    pub verbose: bool,
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub async fn execute(cli: Cli) -> Result<(), CliError> {
    let config =
        AppConfig::resolve(cli.config.as_deref())?.with_overrides(cli.database, cli.backend);
    let output = Output {
        json: cli.json_mode,
        quiet: cli.quiet,
        verbose: cli.verbose,
    };

    // No subcommand - show status by default
    let command = cli.command.unwrap_or(Commands::Status);

    if let Commands::Init { force } = command {
        return cmd_init(&config, force, output).await;
    }

    let ctx = Context::open(config, output).await?;
    match command {
        Commands::Ingest { files, format } => cmd_ingest(&ctx, &files, &format).await,
        Commands::Buckets { from, to, days } => {
            cmd_buckets(&ctx, from.as_deref(), to.as_deref(), days).await
        }
        Commands::Dumps { bucket } => cmd_dumps(&ctx, &bucket).await,
        Commands::Properties { dump } => cmd_properties(&ctx, &dump).await,
        Commands::Dashboard { days } => cmd_dashboard(&ctx, days).await,
        Commands::Status | Commands::Init { .. } => cmd_status(&ctx).await,
    }
}
