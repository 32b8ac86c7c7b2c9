//! Artifact cache operator tool.
//!
//! Inspects and maintains a shared cache store file. Clearing persisted
//! rows is an operator action, so it lives here rather than on the
//! library's per-process `clear`.

mod commands;

use anyhow::{bail, Context, Result};
use artifact_cache::{runtime_cache_path, ArtifactCache, CacheConfig};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{debug, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "artifact-cache")]
#[command(about = "Inspect and maintain an artifact cache store")]
struct Args {
    /// Store file to operate on
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Data directory holding runtime_cache.db (used when --db is absent)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// JSON cache configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List namespace tables and their row counts
    Stats,

    /// Print the cached payload for an entity, if fresh
    Get {
        #[arg(long)]
        namespace: String,
        /// Source file the payload was derived from
        #[arg(long)]
        source: PathBuf,
        #[arg(long)]
        entity: String,
    },

    /// Store a payload for an entity
    Put {
        #[arg(long)]
        namespace: String,
        #[arg(long)]
        source: PathBuf,
        #[arg(long)]
        entity: String,
        /// Payload text
        #[arg(long, conflicts_with = "payload_file")]
        payload: Option<String>,
        /// Read the payload from a file
        #[arg(long)]
        payload_file: Option<PathBuf>,
    },

    /// Trim a namespace to its newest rows
    Prune {
        #[arg(long)]
        namespace: String,
        /// Rows to keep (defaults to the configured max_rows)
        #[arg(long)]
        max_rows: Option<usize>,
    },

    /// Delete every persisted row of a namespace
    Purge {
        #[arg(long)]
        namespace: String,
        /// Confirm the deletion
        #[arg(long)]
        yes: bool,
    },
}

fn resolve_db_path(args: &Args) -> Result<PathBuf> {
    match (&args.db, &args.data_dir) {
        (Some(db), _) => Ok(db.clone()),
        (None, Some(dir)) => Ok(runtime_cache_path(dir)),
        (None, None) => bail!("either --db or --data-dir is required"),
    }
}

fn load_config(args: &Args) -> Result<CacheConfig> {
    match &args.config {
        Some(path) => CacheConfig::from_json_file(path)
            .with_context(|| format!("loading cache config {}", path.display())),
        None => Ok(CacheConfig::default()),
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging
    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let db_path = resolve_db_path(&args)?;
    let config = load_config(&args)?;
    debug!("Using cache store {}", db_path.display());

    let cache = ArtifactCache::builder(&db_path)
        .config(config)
        .build()
        .context("building cache")?;

    let output = match args.command {
        Command::Stats => commands::stats(&cache)?,
        Command::Get {
            namespace,
            source,
            entity,
        } => commands::get(&cache, &namespace, &source, &entity)?,
        Command::Put {
            namespace,
            source,
            entity,
            payload,
            payload_file,
        } => {
            let payload = match (payload, payload_file) {
                (Some(text), _) => text,
                (None, Some(file)) => std::fs::read_to_string(&file)
                    .with_context(|| format!("reading payload from {}", file.display()))?,
                (None, None) => bail!("either --payload or --payload-file is required"),
            };
            commands::put(&cache, &namespace, &source, &entity, &payload)?
        }
        Command::Prune {
            namespace,
            max_rows,
        } => commands::prune(&cache, &namespace, max_rows)?,
        Command::Purge { namespace, yes } => {
            if !yes {
                bail!("purge deletes shared rows for every process; pass --yes to confirm");
            }
            commands::purge(&cache, &namespace)?
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
