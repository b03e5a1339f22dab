//! # Doc Harness CLI (`dh`)
//!
//! The `dh` binary drives the ingestion pipeline: schema setup, conversion of
//! the raw tree, bulk and incremental indexing, search, and a status view.
//!
//! ## Usage
//!
//! ```bash
//! dh --config ./config/dh.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `dh init` | Create the SQLite database and run schema migrations |
//! | `dh convert [--index]` | Normalize every raw source, optionally bulk index after |
//! | `dh index` | Bulk index the normalized tree, resuming from the progress ledger |
//! | `dh update` | Index what changed since the last committed cache snapshot |
//! | `dh search "<query>" --version 17.0` | Search one release |
//! | `dh status` | Show cache, ledger and index counts |
//!
//! Logs go to stderr. `RUST_LOG` overrides the level chosen by `--verbose`.

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use doc_harness::ingest::CancelFlag;
use doc_harness::{bulk, config, migrate, normalize, search, status, update};

/// Doc Harness CLI: incremental ingestion of versioned documentation into a
/// searchable vector index.
#[derive(Parser)]
#[command(
    name = "dh",
    about = "Doc Harness: incremental ingestion of versioned documentation into a vector index",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/dh.toml")]
    config: PathBuf,

    /// Enable debug logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Convert every raw source file into the normalized markdown tree.
    ///
    /// Files that fail to convert are reported and skipped.
    Convert {
        /// Bulk index the normalized tree once conversion finishes.
        #[arg(long)]
        index: bool,
    },

    /// Index the whole normalized tree.
    ///
    /// Files recorded in the progress ledger are skipped, so an interrupted
    /// run picks up where it stopped.
    Index,

    /// Index sources added, modified or removed since the last update.
    ///
    /// The first run against an empty cache records a baseline and indexes
    /// nothing. If any file fails, the cache is left at its previous state.
    Update,

    /// Search one release of the index.
    Search {
        /// The search query string.
        query: String,

        /// Release label, e.g. `17.0`.
        #[arg(long)]
        version: String,

        /// Maximum number of results to return.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Show what each store holds.
    Status,
}

fn init_tracing(verbose: bool) -> Result<()> {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow!("Failed to set tracing subscriber: {}", e))
}

/// Cancel the flag on the first Ctrl-C. The running batch stops before its
/// next file and rolls back.
fn cancel_on_ctrl_c() -> CancelFlag {
    let cancel = CancelFlag::new();
    let handle = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping before the next file");
            handle.cancel();
        }
    });
    cancel
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose)?;

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
        }
        Commands::Convert { index } => {
            normalize::run_convert(&cfg)?;
            if index {
                bulk::run_index(&cfg, &cancel_on_ctrl_c()).await?;
            }
        }
        Commands::Index => {
            bulk::run_index(&cfg, &cancel_on_ctrl_c()).await?;
        }
        Commands::Update => {
            update::run_update(&cfg, &cancel_on_ctrl_c()).await?;
        }
        Commands::Search {
            query,
            version,
            limit,
        } => {
            search::run_search(&cfg, &query, &version, limit).await?;
        }
        Commands::Status => {
            status::run_status(&cfg).await?;
        }
    }

    Ok(())
}
