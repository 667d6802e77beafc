//! CLI entry point for the embedding indexer.
//!
//! Provides commands for adding texts, running the background indexer and
//! querying the semantic index.

use anyhow::{Context, Result};
use clap::{
    Parser, Subcommand,
    builder::styling::{AnsiColor, Effects, Styles},
};
use console::style;
use semindex::backend::local::DEFAULT_CACHE_DIR;
use semindex::config::DEFAULT_CONFIG_FILE;
use semindex::{
    BatchPolicy, ContentType, ContentTypeFilter, DaemonState, Embedder, EmbedderConfig,
    FastEmbedBackend, Settings, SqliteStore, TaskManager,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::info;

fn clap_cargo_style() -> Styles {
    Styles::styled()
        .header(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

/// Semantic index over a SQLite text store
#[derive(Parser)]
#[command(
    name = "semindex",
    version = env!("CARGO_PKG_VERSION"),
    about = "Incremental embedding indexer and semantic search",
    next_line_help = true,
    styles = clap_cargo_style()
)]
struct Cli {
    /// Path to a settings file (defaults to ./semindex.toml)
    #[arg(short, long, global = true, env = "SEMINDEX_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Show the active settings
    Config,

    /// Add a text row to the store
    Add {
        /// title, document, comment or contact
        #[arg(short, long, default_value = "document")]
        kind: ContentType,

        /// IRI the text belongs to
        #[arg(short, long, default_value = "")]
        iri: String,

        text: String,
    },

    /// Embed pending texts, then keep indexing until Ctrl-C
    Index {
        /// Run a single cycle and exit
        #[arg(long)]
        once: bool,
    },

    /// Search texts by meaning
    Search {
        query: String,

        /// Maximum number of results
        #[arg(short, long, default_value_t = 20)]
        limit: i64,

        /// Comma separated content types
        #[arg(short, long, default_value = "title,document,comment,contact")]
        types: ContentTypeFilter,

        /// Only texts whose IRI matches this glob
        #[arg(long, default_value = "*")]
        iri: String,

        /// Minimum similarity in (0, 1]
        #[arg(long, default_value_t = 0.0)]
        threshold: f32,
    },

    /// Show model and index counters
    Status,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let settings = match Settings::load(cli.config.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("{} {e}", style("Configuration error:").red().bold());
            std::process::exit(1);
        }
    };
    semindex::logging::init(&settings.logging.level);

    if let Err(e) = run(cli, settings).await {
        eprintln!("{} {e:#}", style("Error:").red().bold());
        std::process::exit(1);
    }
}

async fn run(cli: Cli, settings: Settings) -> Result<()> {
    match cli.command {
        Commands::Init { force } => {
            let path = cli
                .config
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
            let path = Settings::write_default(&path, force)
                .map_err(|e| anyhow::anyhow!("{e}"))?;
            println!("Created configuration file at: {}", path.display());
        }

        Commands::Config => {
            println!("{}", style("Current Configuration:").cyan().bold());
            println!("{}", "=".repeat(50));
            println!("{}", toml::to_string_pretty(&settings)?);
        }

        Commands::Add { kind, iri, text } => {
            let store = open_store(&settings)?;
            let id = store.insert_text(kind, &text, &iri)?;
            println!("Added {kind} #{id}");
        }

        Commands::Index { once } => {
            let mut config = EmbedderConfig::try_from(&settings.embedding)?;
            if once {
                config.interval = Duration::ZERO;
            }
            let embedder = Arc::new(build_embedder(&settings, config)?);

            let cancel = CancellationToken::new();
            let shutdown = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("shutdown requested");
                    shutdown.cancel();
                }
            });

            let start = Instant::now();
            if let Some(handle) = embedder.start(cancel) {
                handle.await.context("indexer task failed")?;
            }
            let status = embedder.status()?;
            println!(
                "Embedded {}/{} texts in {:.1}s",
                status.already_embedded,
                status.total_embeddable,
                start.elapsed().as_secs_f64()
            );
            embedder.shutdown().await?;
        }

        Commands::Search {
            query,
            limit,
            types,
            iri,
            threshold,
        } => {
            let config = EmbedderConfig::try_from(&settings.embedding)?;
            let embedder = build_embedder(&settings, config)?;
            embedder.ensure_model(&CancellationToken::new()).await?;

            let results = embedder
                .search(&query, limit, &types, &iri, threshold)
                .await?;
            if results.is_empty() {
                println!("No results.");
            }
            for hit in results.to_list(true) {
                let (kind, text) = embedder
                    .store()
                    .text(hit.row_id)?
                    .unwrap_or((ContentType::Document, String::new()));
                println!(
                    "{} {} {}",
                    style(format!("{:.3}", hit.score)).green(),
                    style(format!("[{kind} #{}]", hit.row_id)).dim(),
                    preview(&text, 100)
                );
            }
            embedder.shutdown().await?;
        }

        Commands::Status => {
            let config = EmbedderConfig::try_from(&settings.embedding)?;
            let embedder = build_embedder(&settings, config)?;
            let status = embedder.status()?;
            println!("{}", style("Index Status:").cyan().bold());
            println!("  Database:   {}", settings.database.path.display());
            println!("  Model:      {} ({})", status.model, status.state);
            println!(
                "  Embedded:   {}/{}",
                status.already_embedded, status.total_embeddable
            );
            match embedder.store().model_checksum()? {
                Some(checksum) => println!("  Checksum:   {checksum}"),
                None => println!("  Checksum:   (none)"),
            }
        }
    }
    Ok(())
}

fn open_store(settings: &Settings) -> Result<SqliteStore> {
    SqliteStore::open(&settings.database.path, settings.database.pool_size).with_context(|| {
        format!(
            "failed to open database {}",
            settings.database.path.display()
        )
    })
}

/// Wire the local backend, the store and an active in-process registry.
fn build_embedder(settings: &Settings, config: EmbedderConfig) -> Result<Embedder> {
    let store = Arc::new(open_store(settings)?);
    let embedding = &settings.embedding;
    let backend = FastEmbedBackend::new(
        embedding
            .cache_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE_DIR)),
        BatchPolicy::new(
            embedding.batch_size,
            Duration::from_millis(embedding.wait_between_batches_ms),
        ),
    )
    .with_download_progress(embedding.force_pull);

    let registry = Arc::new(TaskManager::new());
    registry.update_global_state(DaemonState::Active);

    Ok(Embedder::new(config, Arc::new(backend), store, registry)?)
}

fn preview(text: &str, max_chars: usize) -> String {
    let line = text.lines().next().unwrap_or_default();
    if line.chars().count() > max_chars {
        let cut: String = line.chars().take(max_chars).collect();
        format!("{cut}...")
    } else {
        line.to_string()
    }
}
