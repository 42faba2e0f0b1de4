//! Consolidator CLI: route research notes into a markdown corpus.
//!
//! Usage:
//!   consolidator decide <file> [--topic t]... [--confidence c]
//!   consolidator ingest <file> [--strategy integrate|append|replace]
//!   consolidator merge <doc-id> <file> [--strategy s]
//!   consolidator reindex [<doc-id>]
//!   consolidator show <doc-id>

use clap::{Args, Parser, Subcommand};
use consolidator::{
    resolve_config_path, CandidateMetadata, ConsolidationConfig, ConsolidationCoordinator,
    DocumentCorpus, DocumentId, DocumentStatus, Embedder, EmbeddingIndex, FsCorpus, JsonlAuditLog,
    MergeReport, MergeStrategy, SqliteEmbeddingIndex,
};
use serde::Serialize;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(
    name = "consolidator",
    version,
    about = "Decide create/merge/update for research notes and merge without losing content"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (default: $CONSOLIDATOR_CONFIG, then the user config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding the corpus and index
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Args)]
struct CandidateArgs {
    /// File with the research text, or `-` for stdin
    file: PathBuf,
    /// Topic tag (repeatable)
    #[arg(long = "topic")]
    topics: Vec<String>,
    /// Research question (repeatable)
    #[arg(long = "question")]
    questions: Vec<String>,
    /// Confidence in [0, 1]
    #[arg(long, default_value_t = 0.5)]
    confidence: f32,
    /// Status to promote a merged document to (capped at validated)
    #[arg(long, default_value = "draft")]
    status: DocumentStatus,
}

#[derive(Subcommand)]
enum Commands {
    /// Show what would happen to a candidate without writing anything
    Decide {
        #[command(flatten)]
        candidate: CandidateArgs,
    },
    /// Decide and apply: create a document or merge into the best match
    Ingest {
        #[command(flatten)]
        candidate: CandidateArgs,
        /// Merge strategy for MERGE and UPDATE (default from config)
        #[arg(long)]
        strategy: Option<MergeStrategy>,
    },
    /// Merge a candidate into a specific document
    Merge {
        /// Target document id
        id: String,
        #[command(flatten)]
        candidate: CandidateArgs,
        #[arg(long, default_value = "integrate")]
        strategy: MergeStrategy,
    },
    /// Rebuild index entries from the corpus
    Reindex {
        /// Only this document
        id: Option<String>,
    },
    /// Mark a document archived
    Archive {
        id: String,
    },
    /// Print a stored document
    Show {
        id: String,
    },
}

/// Default data directory (~/.local/share/consolidator)
fn default_data_dir() -> PathBuf {
    let data_dir = dirs::data_dir()
        .unwrap_or_else(|| dirs::home_dir().unwrap_or_default().join(".local/share"));
    data_dir.join("consolidator")
}

fn load_config(explicit: Option<&Path>) -> Result<ConsolidationConfig, String> {
    match resolve_config_path(explicit) {
        Some(path) => {
            tracing::debug!(path = %path.display(), "loading config");
            ConsolidationConfig::load(&path).map_err(|e| e.to_string())
        }
        None => Ok(ConsolidationConfig::default()),
    }
}

#[cfg(feature = "embeddings")]
fn open_embedder(_config: &ConsolidationConfig) -> Result<Arc<dyn Embedder>, String> {
    let embedder = consolidator::index::FastEmbedEmbedder::default_model()
        .map_err(|e| format!("Failed to load embedding model: {}", e))?;
    Ok(Arc::new(embedder))
}

#[cfg(not(feature = "embeddings"))]
fn open_embedder(config: &ConsolidationConfig) -> Result<Arc<dyn Embedder>, String> {
    Ok(Arc::new(consolidator::HashingEmbedder::new(
        config.index.dimensions,
    )))
}

fn open_coordinator(cli: &Cli) -> Result<ConsolidationCoordinator, String> {
    let config = load_config(cli.config.as_deref())?;
    let data_dir = cli.data_dir.clone().unwrap_or_else(default_data_dir);

    let corpus = FsCorpus::open(data_dir.join("corpus"))
        .map_err(|e| format!("Failed to open corpus: {}", e))?;
    let index_path = config
        .index
        .path
        .clone()
        .unwrap_or_else(|| data_dir.join("index.db"));
    let index: Arc<dyn EmbeddingIndex> = Arc::new(
        SqliteEmbeddingIndex::open(&index_path, config.index.dimensions)
            .map_err(|e| format!("Failed to open index: {}", e))?,
    );
    let embedder = open_embedder(&config)?;

    // Fails when the model's vectors do not fit index.dimensions
    let mut coordinator =
        ConsolidationCoordinator::from_config(&config, Arc::new(corpus), Some((embedder, index)))
            .map_err(|e| e.to_string())?;
    if let Some(path) = &config.audit_log {
        let log = JsonlAuditLog::open(path).map_err(|e| format!("Failed to open audit log: {}", e))?;
        coordinator = coordinator.with_audit(Arc::new(log));
    }
    Ok(coordinator)
}

fn read_text(path: &Path) -> Result<String, String> {
    if path.as_os_str() == "-" {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .map_err(|e| format!("Failed to read stdin: {}", e))?;
        return Ok(text);
    }
    std::fs::read_to_string(path).map_err(|e| format!("Failed to read {}: {}", path.display(), e))
}

fn candidate(args: &CandidateArgs) -> Result<(String, CandidateMetadata), String> {
    if !(0.0..=1.0).contains(&args.confidence) {
        return Err(format!("confidence {} is outside [0, 1]", args.confidence));
    }
    let metadata = CandidateMetadata::new(args.confidence)
        .with_topics(&args.topics)
        .with_questions(&args.questions)
        .with_status(args.status);
    Ok((read_text(&args.file)?, metadata))
}

fn print_json<T: Serialize>(value: &T) -> Result<(), String> {
    let out = serde_json::to_string_pretty(value).map_err(|e| e.to_string())?;
    println!("{}", out);
    Ok(())
}

fn print_report(report: &MergeReport) {
    println!("{}", report.summary());
    for conflict in &report.conflicts {
        println!(
            "  [{:?}/{:?}] {} ({:?})",
            conflict.kind, conflict.severity, conflict.description, conflict.resolution
        );
    }
    for line in &report.withheld {
        println!("  withheld from '{}': {}", line.section, line.line);
    }
}

async fn run(cli: Cli) -> Result<(), String> {
    let coordinator = open_coordinator(&cli)?;

    match &cli.command {
        Commands::Decide { candidate: args } => {
            let (text, metadata) = candidate(args)?;
            let decision = coordinator
                .decide(&text, &metadata)
                .map_err(|e| e.to_string())?;
            if cli.json {
                return print_json(&decision);
            }
            println!("{} ({:.2})", decision.action, decision.score);
            println!("{}", decision.rationale);
        }
        Commands::Ingest {
            candidate: args,
            strategy,
        } => {
            let (text, metadata) = candidate(args)?;
            let outcome = coordinator
                .consolidate(&text, &metadata, *strategy)
                .await
                .map_err(|e| e.to_string())?;
            if cli.json {
                return print_json(&outcome);
            }
            println!(
                "{} -> {} (revision {})",
                outcome.decision.action, outcome.document.id, outcome.document.revision
            );
            println!("{}", outcome.decision.rationale);
            if let Some(report) = &outcome.report {
                print_report(report);
            }
        }
        Commands::Merge {
            id,
            candidate: args,
            strategy,
        } => {
            let (text, metadata) = candidate(args)?;
            let outcome = coordinator
                .merge(&DocumentId::from(id.as_str()), &text, &metadata, *strategy)
                .await
                .map_err(|e| e.to_string())?;
            if cli.json {
                return print_json(&outcome);
            }
            println!("{} (revision {})", outcome.document.id, outcome.document.revision);
            print_report(&outcome.report);
        }
        Commands::Reindex { id: Some(id) } => {
            coordinator
                .reindex(&DocumentId::from(id.as_str()))
                .await
                .map_err(|e| e.to_string())?;
            println!("Reindexed {}", id);
        }
        Commands::Reindex { id: None } => {
            let count = coordinator.reindex_all().await.map_err(|e| e.to_string())?;
            println!("Reindexed {} document(s)", count);
        }
        Commands::Archive { id } => {
            let doc = coordinator
                .archive(&DocumentId::from(id.as_str()))
                .await
                .map_err(|e| e.to_string())?;
            if cli.json {
                return print_json(&doc);
            }
            println!("{} archived (revision {})", doc.id, doc.revision);
        }
        Commands::Show { id } => {
            let doc = coordinator
                .corpus()
                .read(&DocumentId::from(id.as_str()))
                .map_err(|e| e.to_string())?;
            if cli.json {
                return print_json(&doc);
            }
            print!("{}", doc.to_markdown().map_err(|e| e.to_string())?);
        }
    }
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error: failed to start runtime: {}", e);
            std::process::exit(1);
        }
    };
    if let Err(e) = runtime.block_on(run(cli)) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
