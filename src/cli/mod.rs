use anyhow::{anyhow, Context as _, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::{Config, EmbeddingBackend};
use crate::embed::{self, Embedder};
use crate::vectordb::{CollectionKey, CollectionStore};

mod commands;
mod doctor;
mod setup;

/// Per-project semantic code index with incremental updates
#[derive(Parser, Debug)]
#[command(name = "semdex")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress informational output (only show results/errors)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Config file (defaults to <data-dir>/config.toml when present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Directory holding collections, models and snapshots
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Embedding backend: fastembed, openai or hashing
    #[arg(long, global = true)]
    pub embedder: Option<String>,

    /// Embedding model to use (e.g., bge-small, minilm-l6, bge-base, mxbai-large)
    #[arg(long, global = true)]
    pub model: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the HTTP server
    Serve {
        /// Address to bind
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Index a local folder into a project collection
    Index {
        /// Path to index (defaults to current directory)
        path: Option<PathBuf>,

        /// Machine id owning the collection
        #[arg(long, default_value = "local")]
        machine: String,

        /// Project name (defaults to the folder name)
        #[arg(long)]
        project: Option<String>,

        /// Send only files changed since the last run
        #[arg(short, long)]
        incremental: bool,

        /// Show what would be indexed without actually indexing
        #[arg(long)]
        dry_run: bool,
    },

    /// Search a project using natural language
    Search {
        /// Search query (e.g., "where do we handle authentication?")
        query: String,

        #[arg(long, default_value = "local")]
        machine: String,

        #[arg(long)]
        project: String,

        /// Number of matches (defaults to [search] top_k)
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// Show full chunk content instead of snippets
        #[arg(short, long)]
        content: bool,

        /// Show relevance scores
        #[arg(long)]
        scores: bool,

        /// Output JSON
        #[arg(long)]
        json: bool,
    },

    /// List all collections
    List,

    /// Show statistics about one collection
    Stats {
        #[arg(long, default_value = "local")]
        machine: String,

        #[arg(long)]
        project: String,
    },

    /// Delete a collection
    Drop {
        #[arg(long, default_value = "local")]
        machine: String,

        #[arg(long)]
        project: String,

        /// Skip confirmation prompt
        #[arg(short = 'y', long)]
        yes: bool,
    },

    /// Check installation health
    Doctor,

    /// Download the local embedding model
    Setup,
}

pub async fn run(cli: Cli) -> Result<()> {
    if cli.quiet {
        crate::output::set_quiet(true);
    }

    let config = load_config(&cli)?;

    match cli.command {
        Commands::Serve { host, port } => commands::serve(config, host, port).await,
        Commands::Index {
            path,
            machine,
            project,
            incremental,
            dry_run,
        } => commands::index(config, path, machine, project, incremental, dry_run).await,
        Commands::Search {
            query,
            machine,
            project,
            top_k,
            content,
            scores,
            json,
        } => {
            // Auto-enable quiet mode for JSON output
            if json {
                crate::output::set_quiet(true);
            }
            let key = CollectionKey::new(machine, project);
            commands::search(config, key, query, top_k, content, scores, json).await
        }
        Commands::List => commands::list(&config),
        Commands::Stats { machine, project } => commands::stats(&config, &CollectionKey::new(machine, project)),
        Commands::Drop {
            machine,
            project,
            yes,
        } => commands::drop(&config, &CollectionKey::new(machine, project), yes),
        Commands::Doctor => doctor::run(config).await,
        Commands::Setup => setup::run(config).await,
    }
}

/// Config file plus command-line overrides
fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match (&cli.config, &cli.data_dir) {
        (Some(path), _) => Config::load(Some(path.as_path()))?,
        (None, Some(dir)) => {
            let in_dir = dir.join(crate::config::CONFIG_FILE_NAME);
            if in_dir.exists() {
                Config::load(Some(in_dir.as_path()))?
            } else {
                Config::default()
            }
        }
        (None, None) => Config::load(None)?,
    };

    if let Some(dir) = &cli.data_dir {
        config.data_dir = dir.clone();
    }
    if let Some(name) = &cli.embedder {
        config.embedding.backend = EmbeddingBackend::from_name(name).ok_or_else(|| {
            anyhow!("Unknown embedder '{}'. Available: fastembed, openai, hashing", name)
        })?;
    }
    if let Some(model) = &cli.model {
        config.embedding.model = Some(model.clone());
    }

    Ok(config)
}

/// Build the configured embedder off the async runtime; local models may
/// download weights on first use.
pub(crate) async fn load_embedder(config: &Config) -> Result<Arc<dyn Embedder>> {
    let embedding = config.embedding.clone();
    let data_dir = config.data_dir()?;
    tokio::task::spawn_blocking(move || embed::from_config(&embedding, &data_dir))
        .await
        .context("Embedder initialisation panicked")?
}

pub(crate) fn open_store(config: &Config, embedder: &dyn Embedder) -> Arc<CollectionStore> {
    Arc::new(CollectionStore::new(
        config.collections_dir(),
        embedder.dimensions(),
        embedder.model_name(),
        config.vectordb.map_size_mb,
    ))
}
