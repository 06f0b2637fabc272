//! # Docent CLI (`docent`)
//!
//! The `docent` binary is the primary interface for Docent. It provides
//! commands for building the embedding index from site content, searching
//! it, inspecting it, and starting the chat HTTP server.
//!
//! ## Usage
//!
//! ```bash
//! docent --config ./config/docent.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docent index` | Extract, chunk, and embed site content into the index file |
//! | `docent search "<query>"` | Search the index and print ranked chunks |
//! | `docent serve` | Start the chat HTTP server |
//! | `docent stats` | Print a summary of the persisted index |
//!
//! ## Examples
//!
//! ```bash
//! # Build the index from the content directories
//! docent index --config ./config/docent.toml
//!
//! # Preview what a build would index, without calling the API
//! docent index --dry-run
//!
//! # Query from the command line
//! docent search "how does the deploy pipeline work?"
//!
//! # Start the chat server for the site frontend
//! docent serve --config ./config/docent.toml
//! ```

mod chunk;
mod config;
mod context;
mod embedding;
mod extract;
mod generate;
mod indexer;
mod intent;
mod models;
mod ratelimit;
mod retrieve;
mod server;
mod stats;
mod store;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Docent CLI for the site's retrieval-augmented chat backend.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/docent.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "docent",
    about = "Retrieval-augmented chat backend for a personal portfolio and blog site",
    version,
    long_about = "Docent indexes the site's markdown content (blog posts, project pages, and the \
    resume) into embedding vectors, and answers visitor questions over that content through a \
    streaming chat endpoint with retrieval, intent rules, and rate limiting."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/docent.toml`. All content, index, retrieval,
    /// and server settings are read from this file.
    #[arg(long, global = true, default_value = "./config/docent.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Build the embedding index from site content.
    ///
    /// Extracts posts, projects, and the resume from the content
    /// directories, chunks and embeds them, and atomically replaces the
    /// index file. Run after every content change.
    Index {
        /// Show document and chunk counts without embedding or writing.
        #[arg(long)]
        dry_run: bool,
    },

    /// Search the index from the command line.
    ///
    /// Embeds the query and prints the top scoring chunks with scores,
    /// URLs, and excerpts. Falls back to keyword matching when no
    /// embedding provider is configured.
    Search {
        /// The search query string.
        query: String,

        /// Maximum number of results to return.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Start the chat HTTP server.
    ///
    /// Binds to the address configured in `[server].bind` and serves
    /// `POST /chat` and `GET /healthz`.
    Serve,

    /// Print a summary of the persisted index.
    ///
    /// Shows record counts, per-kind breakdowns, and date coverage.
    /// Useful for verifying an index build.
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Index { dry_run } => {
            indexer::run_index(&cfg, dry_run).await?;
        }
        Commands::Search { query, limit } => {
            retrieve::run_search(&cfg, &query, limit).await?;
        }
        Commands::Serve => {
            server::run_server(cfg).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg)?;
        }
    }

    Ok(())
}
