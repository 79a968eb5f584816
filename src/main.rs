//! # docgraph CLI (`dgx`)
//!
//! The `dgx` binary is the interface to docgraph. It provides commands for
//! database initialization, document ingestion, search, graph queries,
//! relation extraction, and corpus inspection.
//!
//! ## Usage
//!
//! ```bash
//! dgx --config ./config/dgx.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `dgx init` | Create the SQLite database and run schema migrations |
//! | `dgx ingest <path>` | Ingest a file or directory of text documents |
//! | `dgx search "<query>"` | Hybrid (vector + lexical) search |
//! | `dgx entity <name>` | Find documents mentioning an entity |
//! | `dgx related <id>` | Show documents related to a document |
//! | `dgx relations extract` | Judge candidate document pairs |
//! | `dgx get <id>` | Retrieve a full document by UUID |
//! | `dgx delete <id>` | Delete a document and everything attached to it |
//! | `dgx stats` | Corpus overview |

mod chunk;
mod config;
mod db;
mod embedding;
mod entities;
mod error;
mod get;
mod graph;
mod ingest;
mod migrate;
mod models;
mod relations;
mod search;
mod stats;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// docgraph CLI — a local-first document knowledge base over SQLite.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/dgx.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "dgx",
    about = "docgraph — a local-first document knowledge base with hybrid search and a relation graph",
    version,
    long_about = "docgraph ingests text documents into SQLite, chunking and embedding them, \
    extracting entity mentions, and judging typed relations between documents. Retrieval \
    combines vector and full-text search via reciprocal rank fusion."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/dgx.toml`. Database, chunking, embedding,
    /// reasoning, and retrieval settings are read from this file.
    #[arg(long, global = true, default_value = "./config/dgx.toml")]
    config: PathBuf,

    /// Project scope for commands that support it.
    #[arg(long, global = true)]
    project: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables (documents,
    /// chunks, chunks_fts, entities, relations, meta). This command is
    /// idempotent — running it multiple times is safe.
    Init,

    /// Ingest a file or a directory of text documents.
    ///
    /// Chunks each document, embeds the chunks, and extracts entity
    /// mentions. Re-ingesting identical content is a no-op (counters are
    /// bumped); changed content under a known source path is rebuilt in
    /// place. One failing file does not stop the batch.
    Ingest {
        /// File or directory to ingest (.md, .markdown, .txt).
        path: PathBuf,

        /// Maximum number of files to process.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Search indexed documents.
    ///
    /// Runs vector and full-text search and fuses the results by
    /// reciprocal rank. Degrades to a single leg when the other is
    /// unavailable.
    Search {
        /// The search query string.
        query: String,

        /// Maximum number of results to return.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Find documents mentioning an entity.
    ///
    /// Matches entity names case-insensitively by substring, optionally
    /// restricted to one entity type.
    Entity {
        /// Entity name (or fragment) to look for.
        name: String,

        /// Restrict to one entity type: ORG, PER, DATE, MONEY, DOC_REF.
        #[arg(long = "type")]
        entity_type: Option<String>,
    },

    /// Show documents related to a document.
    ///
    /// Lists the one-hop relation neighborhood in both directions, highest
    /// confidence first.
    Related {
        /// Document UUID.
        id: String,
    },

    /// Manage document relations.
    Relations {
        #[command(subcommand)]
        action: RelationsAction,
    },

    /// Retrieve a document by its UUID.
    ///
    /// Prints the document's metadata, full body text, chunks, and entity
    /// mentions.
    Get {
        /// Document UUID.
        id: String,
    },

    /// Delete a document.
    ///
    /// Removes the document together with its chunks, index entries,
    /// entities, and any relations touching it.
    Delete {
        /// Document UUID.
        id: String,
    },

    /// Show corpus statistics.
    Stats,
}

/// Relation management subcommands.
#[derive(Subcommand)]
enum RelationsAction {
    /// Judge candidate document pairs and write accepted relations.
    ///
    /// Candidates are document pairs sharing entity names. Each accepted
    /// judgement replaces earlier relations between that pair. Requires a
    /// reasoning provider to be configured.
    Extract {
        /// Maximum candidate pairs to judge (overrides config).
        #[arg(long)]
        max_pairs: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    let project = cli.project.as_deref();

    match cli.command {
        Commands::Init => {
            migrate::run_init(&cfg).await?;
        }
        Commands::Ingest { path, limit } => {
            ingest::run_ingest(&cfg, &path, project, limit).await?;
        }
        Commands::Search { query, limit } => {
            search::run_search(&cfg, &query, project, limit).await?;
        }
        Commands::Entity { name, entity_type } => {
            graph::run_entity(&cfg, &name, entity_type.as_deref(), project).await?;
        }
        Commands::Related { id } => {
            graph::run_related(&cfg, &id).await?;
        }
        Commands::Relations { action } => match action {
            RelationsAction::Extract { max_pairs } => {
                relations::run_extract(&cfg, project, max_pairs).await?;
            }
        },
        Commands::Get { id } => {
            get::run_get(&cfg, &id).await?;
        }
        Commands::Delete { id } => {
            get::run_delete(&cfg, &id).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
    }

    Ok(())
}
