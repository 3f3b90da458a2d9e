//! CLI command definitions for the `semem` binary.
//!
//! Uses clap derive macros for argument parsing. Commands are flat verbs
//! (`semem store`, `semem retrieve`, `semem migrate`).

pub mod admin;
pub mod context;
pub mod memory;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use semem_types::backend::BackendKind;
use semem_types::backup::{BackupFormat, MergeStrategy};
use uuid::Uuid;

/// Semantic memory for conversational agents.
#[derive(Parser)]
#[command(name = "semem", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Write logs to stderr as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Export spans to stdout through OpenTelemetry.
    #[arg(long, global = true)]
    pub otel: bool,

    /// Data directory holding config.toml, the file store and backups.
    #[arg(long, env = "SEMEM_HOME", global = true)]
    pub data_dir: Option<PathBuf>,

    /// Use this backend instead of the one in config.toml.
    #[arg(long, global = true)]
    pub backend: Option<BackendKind>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a default config.toml into the data directory.
    Init {
        /// Overwrite an existing config.toml.
        #[arg(long)]
        force: bool,
    },

    /// Store one interaction.
    #[command(alias = "add")]
    Store {
        prompt: String,
        response: String,

        /// Type tag used by filtered retrieval.
        #[arg(long = "type")]
        type_tag: Option<String>,

        /// Extra metadata as key=value (values that parse as JSON keep their type).
        #[arg(long = "meta", value_parser = parse_key_val)]
        meta: Vec<(String, String)>,
    },

    /// Find the interactions most similar to a query.
    #[command(alias = "search")]
    Retrieve {
        query: String,

        /// Maximum number of results.
        #[arg(short, long, default_value_t = 5)]
        k: usize,

        /// Drop results below this cosine similarity.
        #[arg(long, default_value_t = 0.0)]
        min_similarity: f32,

        /// Only consider entries with one of these type tags.
        #[arg(long = "type")]
        types: Vec<String>,
    },

    /// Show one stored interaction.
    Get { id: Uuid },

    /// Delete one stored interaction.
    #[command(alias = "rm")]
    Forget { id: Uuid },

    /// List stored interactions in id order.
    #[command(alias = "ls")]
    List {
        #[arg(long, default_value_t = 0)]
        offset: usize,

        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Show backend statistics.
    Stats,

    /// Delete every stored interaction.
    Clear {
        /// Skip the confirmation prompt.
        #[arg(long)]
        force: bool,
    },

    /// Write a backup of the active backend.
    Backup {
        #[arg(long, default_value = "json")]
        format: BackupFormat,

        /// Include embedding vectors (otherwise they are recomputed on restore).
        #[arg(long)]
        embeddings: bool,

        /// Destination file ("-" for stdout). Defaults to the backup directory.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Load a backup into the active backend.
    Restore {
        file: PathBuf,

        /// Backup format. Inferred from the file extension when omitted.
        #[arg(long)]
        format: Option<BackupFormat>,

        /// replace, merge or merge-overwrite.
        #[arg(long, default_value = "merge")]
        strategy: MergeStrategy,
    },

    /// Copy every interaction into another backend.
    Migrate {
        /// Target backend kind.
        to: BackendKind,

        /// Make the target the configured backend once the copy completes.
        #[arg(long)]
        switch: bool,
    },

    /// Assemble a bounded context window for a query and print it.
    Context {
        query: String,

        #[arg(short, long, default_value_t = 10)]
        k: usize,

        #[arg(long, default_value_t = 0.0)]
        min_similarity: f32,

        #[arg(long = "type")]
        types: Vec<String>,

        /// Override the configured item limit.
        #[arg(long)]
        max_items: Option<usize>,

        /// Override the configured token budget.
        #[arg(long)]
        max_tokens: Option<usize>,

        /// Condense the older half of the window into a summary.
        #[arg(long)]
        summarize: bool,
    },

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{s}'"))?;
    if key.is_empty() {
        return Err(format!("empty key in '{s}'"));
    }
    Ok((key.to_string(), value.to_string()))
}
