//! # dumpling - Crash Triage CLI
//!
//! The main binary for the dumpling crash-triage engine.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │            apps/dumpling (THE BINARY)            │
//! │                                                  │
//! │   ┌──────────┐  ┌──────────┐  ┌──────────────┐   │
//! │   │   CLI    │  │  config  │  │ bounded I/O  │   │
//! │   │  (clap)  │  │  (toml)  │  │   (tokio)    │   │
//! │   └────┬─────┘  └────┬─────┘  └──────┬───────┘   │
//! │        └─────────────┼───────────────┘           │
//! │                      ▼                           │
//! │              ┌───────────────┐                   │
//! │              │ dumpling-core │                   │
//! │              │  (THE LOGIC)  │                   │
//! │              └───────────────┘                   │
//! └──────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! dumpling init
//! dumpling ingest crashes/*.json
//! dumpling buckets --days 7
//! dumpling dumps 3f9a0c.../0xc0000005
//! dumpling --json-mode dashboard
//! ```

use clap::Parser;
use dumpling::cli;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

#[tokio::main]
async fn main() {
    // Parse CLI arguments
    let cli = cli::Cli::parse();

    // Initialize tracing. DUMPLING_LOG_FORMAT=json switches to JSON lines.
    // Logs go to stderr; stdout carries command output.
    let log_format = std::env::var("DUMPLING_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let default_filter = if cli.verbose {
        "dumpling=debug,dumpling_core=debug"
    } else {
        "dumpling=info,dumpling_core=info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(std::io::stderr),
                )
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    // Execute command
    if let Err(e) = cli::execute(cli).await {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}
