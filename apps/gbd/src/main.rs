//! # GBD - Global Benchmark Database
//!
//! The `gbd` binary: catalog queries and maintenance, extraction runs and
//! the HTTP server.
//!
//! ## Usage
//!
//! ```bash
//! export GBD_DB=meta.db:kis_meta.db
//!
//! gbd get "family = crypto and runtime < 30" -r runtime family
//! gbd init local ./benchmarks -j 4
//! gbd serve --port 5000
//! ```
//!
//! Stdout carries command results only (and the worker protocol for the
//! hidden `worker` command); logs are written to stderr.

use clap::Parser;
use gbd::cli;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

#[tokio::main]
async fn main() {
    let cli = cli::Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    if let Err(e) = cli::execute(cli).await {
        tracing::debug!(kind = e.kind(), "Command failed");
        eprintln!("{e}");
        std::process::exit(1);
    }
}

/// Initialize tracing on stderr. `GBD_LOG_FORMAT=json` enables
/// machine-parseable output; `RUST_LOG` overrides the level flags.
fn init_tracing(verbose: bool, quiet: bool) {
    let log_format = std::env::var("GBD_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let default_level = if quiet {
        "gbd=error,gbd_core=error"
    } else if verbose {
        "gbd=debug,gbd_core=debug,tower_http=debug"
    } else {
        "gbd=info,gbd_core=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_level.into());

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
}
