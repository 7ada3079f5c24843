use anyhow::Context;
use clap::{Parser, Subcommand};
use scriptorium_embed::{EmbeddingProvider, OpenAiProvider};
use scriptorium_retriever::{
    config::Config,
    retrieval::{
        change_detector::diff,
        directory_watcher::{ChangeRoute, DirectoryMonitor, IdentityHandler, IndexingHandler},
        indexing_engine::{IndexingEngine, IndexingEngineConfig},
        memory::MemoryJournal,
        search::{RetrievalEngine, RetrievalEngineConfig},
    },
    status::StatusApi,
    storage::{ChangeLogStore, Metadata, SnapshotStore, sqlite_store::SqliteStore},
    vector::service::{VectorService, connector_for},
};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

/// Incremental indexing and semantic search over a directory of text documents.
#[derive(Parser, Debug)]
#[command(name = "scriptorium", author, version, about, long_about = None)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "scriptorium.toml")]
    config: PathBuf,

    /// Corpus root, overriding the configuration
    #[arg(short, long)]
    root: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the data directory, database and a default config file
    Init,
    /// Show changes since the last snapshot without indexing them
    Scan {
        #[arg(short, long, default_value = "summary")]
        format: OutputFormat,
    },
    /// Run one indexing pass
    Index {
        #[arg(short, long, default_value = "summary")]
        format: OutputFormat,
    },
    /// Search one document
    Search {
        /// Root-relative path of the document
        path: String,
        query: String,
        /// Maximum number of chunks (defaults to retrieval.top_k)
        #[arg(short = 'k', long)]
        top_k: Option<usize>,
        /// Include chunk index and similarity score
        #[arg(long)]
        scores: bool,
        #[arg(short, long, default_value = "summary")]
        format: OutputFormat,
    },
    /// Search every indexed document
    Ask { query: String },
    /// Poll the corpus and index changes as they appear
    Watch,
    /// List recent snapshots
    Snapshots {
        #[arg(short, long, default_value_t = 5)]
        limit: usize,
        #[arg(short, long, default_value = "summary")]
        format: OutputFormat,
    },
    /// List recently detected change sets
    Changes {
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
        #[arg(short, long, default_value = "summary")]
        format: OutputFormat,
    },
    /// Show index status
    Status {
        /// List every corpus file with a preview
        #[arg(long)]
        explore: bool,
        #[arg(short, long, default_value = "summary")]
        format: OutputFormat,
    },
    /// Store a memory entry
    Remember {
        text: String,
        /// Entry id (generated when omitted)
        #[arg(long)]
        id: Option<String>,
    },
    /// Fetch memory entries by id
    Recall {
        ids: Vec<String>,
        #[arg(short, long, default_value = "summary")]
        format: OutputFormat,
    },
}

#[derive(Debug, Clone, PartialEq)]
enum OutputFormat {
    Summary,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "summary" => Ok(OutputFormat::Summary),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!("Invalid format: {s}")),
        }
    }
}

/// Shared handles for one invocation.
struct App {
    config: Config,
    store: SqliteStore,
    vectors: Arc<VectorService>,
}

impl App {
    async fn open(config: Config) -> anyhow::Result<Self> {
        let store = SqliteStore::open(&config.storage.db_path()).await?;
        let vectors = Arc::new(VectorService::new(connector_for(
            &config.vector_index,
            store.pool(),
        )));
        Ok(Self {
            config,
            store,
            vectors,
        })
    }

    fn snapshot_type(&self) -> &str {
        &self.config.pipeline.snapshot_type
    }

    fn provider(&self) -> anyhow::Result<Arc<dyn EmbeddingProvider>> {
        let provider = OpenAiProvider::new(self.config.embedding.clone())
            .context("embedding provider is not configured")?;
        Ok(Arc::new(provider))
    }

    fn indexing_engine(&self) -> anyhow::Result<IndexingEngine> {
        Ok(IndexingEngine::new(
            IndexingEngineConfig::from_config(&self.config),
            self.config.detector(),
            self.provider()?,
            Arc::clone(&self.vectors),
            self.store.clone(),
        ))
    }

    fn retrieval_engine(&self) -> anyhow::Result<RetrievalEngine> {
        Ok(RetrievalEngine::new(
            RetrievalEngineConfig::from_config(&self.config),
            self.config.detector(),
            self.provider()?,
            Arc::clone(&self.vectors),
            self.store.clone(),
        ))
    }
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(if args.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        })
        .with_writer(std::io::stderr)
        .init();

    let mut config = Config::load_or_default(&args.config)?;
    if let Some(root) = args.root {
        config.corpus.root = root;
    }

    let app = App::open(config).await?;

    match args.command {
        Commands::Init => init(&args.config, &app).await?,
        Commands::Scan { format } => {
            let baseline = app
                .store
                .latest_snapshot(app.snapshot_type())
                .await?
                .map(|s| s.payload)
                .unwrap_or_default();
            let current = app.config.detector().scan_async().await?;
            let changes = diff(&baseline, &current);
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&changes)?),
                OutputFormat::Summary => {
                    println!("Scanned {} files", current.len());
                    for path in &changes.added {
                        println!("  added     {path}");
                    }
                    for path in &changes.modified {
                        println!("  modified  {path}");
                    }
                    for path in &changes.deleted {
                        println!("  deleted   {path}");
                    }
                    if changes.is_empty() {
                        println!("No changes since the last snapshot.");
                    }
                }
            }
        }
        Commands::Index { format } => {
            let engine = app.indexing_engine()?;
            let report = engine.run_pass().await?;
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
                OutputFormat::Summary => {
                    if report.is_noop() {
                        println!("No new corpus files to index.");
                    } else {
                        println!(
                            "Indexed {} files ({} chunks, {} degraded embeddings)",
                            report.indexed.len(),
                            report.chunks(),
                            report.degraded()
                        );
                        for (path, reason) in &report.failed {
                            println!("  failed  {path}: {reason}");
                        }
                        if !report.changes.deleted.is_empty() {
                            println!("Removed {} deleted files", report.changes.deleted.len());
                        }
                    }
                }
            }
        }
        Commands::Search {
            path,
            query,
            top_k,
            scores,
            format,
        } => {
            let engine = app.retrieval_engine()?;
            let top_k = top_k.unwrap_or(engine.config().top_k);
            let chunks = engine.search_in_file_scored(&path, &query, top_k).await?;
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&chunks)?),
                OutputFormat::Summary => {
                    if chunks.is_empty() {
                        println!("No matching chunks in {path}.");
                    }
                    for chunk in &chunks {
                        if scores {
                            println!("[chunk {} | score {:.4}]", chunk.index, chunk.score);
                        }
                        println!("{}\n---", chunk.text);
                    }
                }
            }
        }
        Commands::Ask { query } => {
            let engine = app.retrieval_engine()?;
            println!("{}", engine.search_corpus(&query).await?);
        }
        Commands::Watch => {
            let engine = Arc::new(app.indexing_engine()?);
            let mut monitor = DirectoryMonitor::new(
                app.config.detector(),
                app.store.clone(),
                app.config.monitor.interval(),
            );
            if let Some(identity) = &app.config.monitor.identity_file {
                monitor = monitor.with_route(ChangeRoute::exact(
                    "identity",
                    identity.clone(),
                    Arc::new(IdentityHandler),
                ));
            }
            let monitor = monitor.with_route(ChangeRoute::all(
                "corpus",
                Arc::new(IndexingHandler::new(engine)),
            ));
            Arc::new(monitor).run().await;
        }
        Commands::Snapshots { limit, format } => {
            let snapshots = app
                .store
                .recent_snapshots(app.snapshot_type(), limit)
                .await?;
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&snapshots)?),
                OutputFormat::Summary => {
                    if snapshots.is_empty() {
                        println!("No snapshot captured.");
                    }
                    for snapshot in &snapshots {
                        println!(
                            "{} ({} files, created {})",
                            snapshot.date,
                            snapshot.payload.len(),
                            snapshot.created_at.format("%Y-%m-%d %H:%M:%S")
                        );
                        println!("{}\n", StatusApi::summarize_payload(&snapshot.payload, 6));
                    }
                }
            }
        }
        Commands::Changes { limit, format } => {
            let entries = app.store.recent_changes(limit).await?;
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&entries)?),
                OutputFormat::Summary => {
                    if entries.is_empty() {
                        println!("No changes recorded.");
                    }
                    for entry in &entries {
                        println!(
                            "{}: {} added, {} modified, {} deleted",
                            entry.recorded_at.format("%Y-%m-%d %H:%M:%S"),
                            entry.changes.added.len(),
                            entry.changes.modified.len(),
                            entry.changes.deleted.len()
                        );
                    }
                }
            }
        }
        Commands::Status { explore, format } => {
            // Best effort; the report shows the failure reason.
            let _ = app.vectors.initialize().await;
            let detector = app.config.detector();
            let status = StatusApi::index_status(
                &detector,
                &app.store,
                &app.vectors,
                app.snapshot_type(),
                None,
            )
            .await?;
            let report = if explore {
                Some(StatusApi::explore_corpus(&detector, &app.store, app.snapshot_type()).await?)
            } else {
                None
            };
            match format {
                OutputFormat::Json => {
                    let value = serde_json::json!({ "status": status, "explore": report });
                    println!("{}", serde_json::to_string_pretty(&value)?);
                }
                OutputFormat::Summary => {
                    println!("{status}");
                    if let Some(report) = report {
                        println!("\n{report}");
                    }
                }
            }
        }
        Commands::Remember { text, id } => {
            let journal = MemoryJournal::new(
                Arc::new(app.indexing_engine()?),
                Arc::clone(&app.vectors),
            );
            let mut metadata = Metadata::new();
            if let Some(id) = id {
                metadata.insert("id".to_string(), id.into());
            }
            let id = journal.add_entry(&text, metadata).await?;
            println!("Stored memory entry {id}");
        }
        Commands::Recall { ids, format } => {
            let journal = MemoryJournal::new(
                Arc::new(app.indexing_engine()?),
                Arc::clone(&app.vectors),
            );
            let entries = journal.fetch_entries(&ids).await?;
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&entries)?),
                OutputFormat::Summary => {
                    for id in &ids {
                        match entries.get(id) {
                            Some(record) => println!(
                                "{id}: {} dims, metadata {}",
                                record.embedding.len(),
                                serde_json::Value::Object(record.metadata.clone())
                            ),
                            None => println!("{id}: not found"),
                        }
                    }
                }
            }
        }
    }
    Ok(())
}

async fn init(config_path: &std::path::Path, app: &App) -> anyhow::Result<()> {
    if !config_path.exists() {
        let rendered = toml::to_string_pretty(&app.config)?;
        std::fs::write(config_path, rendered)
            .with_context(|| format!("writing {}", config_path.display()))?;
        println!("Wrote default configuration to {}", config_path.display());
    }
    let root = &app.config.corpus.root;
    std::fs::create_dir_all(root).with_context(|| format!("creating {}", root.display()))?;

    if let Err(err) = app.vectors.initialize().await {
        println!("Vector index not ready yet: {err}");
    }
    println!(
        "Initialized database at {}",
        app.config.storage.db_path().display()
    );
    println!("Corpus root: {}", root.display());
    Ok(())
}
