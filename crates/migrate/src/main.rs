use anyhow::{Context, Result};
use castgraph::{GraphMirror, VectorStore};
use castgraph_sync::{
    BulkMigration, CastgraphConfig, CheckpointFile, EmbeddingAdapter, HybridRetrievalService,
    RelationalSnapshot, SyncService,
};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Replay a relational snapshot into the graph mirror (and optionally the
/// vector index). Prints the migration report as JSON on stdout.
#[derive(Parser, Debug)]
#[command(name = "castgraph-migrate", version)]
struct Cli {
    /// TOML config file. Missing file means defaults.
    #[arg(long, env = "CASTGRAPH_CONFIG", default_value = "castgraph.toml")]
    config: PathBuf,

    /// JSON export with `characters` and `relationships` arrays.
    #[arg(long)]
    snapshot: PathBuf,

    /// Only migrate this project.
    #[arg(long)]
    project: Option<i64>,

    /// Also embed and index each character's text.
    #[arg(long)]
    index_vectors: bool,

    /// Log level when RUST_LOG is unset.
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON.
    #[arg(long)]
    json_logs: bool,
}

/// Logs go to stderr; stdout carries only the report.
fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    if cli.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_ansi(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

fn path_str(path: &Path) -> Result<&str> {
    path.to_str()
        .with_context(|| format!("path is not valid UTF-8: {}", path.display()))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_telemetry(&cli);
    info!(version = env!("CARGO_PKG_VERSION"), "castgraph-migrate starting");

    let config = CastgraphConfig::load(&cli.config).context("failed to load config")?;
    let snapshot = RelationalSnapshot::from_path(&cli.snapshot)?;

    let graph_path = &config.storage.graph_path;
    let mirror = Arc::new(
        GraphMirror::open(path_str(graph_path)?)
            .with_context(|| format!("failed to open graph mirror {}", graph_path.display()))?,
    );

    let mut migration = BulkMigration::new(snapshot, SyncService::new(mirror.clone()))
        .with_batch_size(config.migration.batch_size);
    if let Some(path) = &config.migration.checkpoint_path {
        migration = migration.with_checkpoint(CheckpointFile::new(path));
    }

    let retrieval = if cli.index_vectors {
        let vector_path = &config.storage.vector_path;
        let store = VectorStore::open(path_str(vector_path)?)
            .with_context(|| format!("failed to open vector store {}", vector_path.display()))?;
        let embedder = EmbeddingAdapter::from_config(&config.embedding)
            .context("failed to build embedding provider")?;
        let retrieval = Arc::new(
            HybridRetrievalService::new(Arc::new(store), embedder)
                .with_params(config.hybrid)
                .with_max_limit(config.retrieval.max_limit),
        );
        migration = migration.with_retrieval(retrieval.clone());
        Some(retrieval)
    } else {
        None
    };

    let report = match cli.project {
        Some(project_id) => migration.migrate_project(project_id),
        None => migration.migrate_all(),
    }
    .context("migration aborted")?;

    let stats = mirror.stats()?;
    info!(
        characters = stats.characters,
        concepts = stats.concepts,
        edges = stats.edges,
        "graph mirror totals"
    );
    if let Some(retrieval) = &retrieval {
        info!(records = retrieval.store().len()?, "vector store totals");
    }

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
