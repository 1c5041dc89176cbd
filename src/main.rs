//! # lexcase CLI
//!
//! The `lexcase` binary ingests legal documents into the local corpus,
//! answers questions over it, and serves the HTTP API.
//!
//! ## Usage
//!
//! ```bash
//! lexcase --config ./config/lexcase.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `lexcase init` | Create the corpus file and schema |
//! | `lexcase ingest <PATH>` | Ingest a document, or every document under a directory |
//! | `lexcase ask "<query>"` | Answer a query (`--stream` prints fragments as they arrive) |
//! | `lexcase feedback "<query>" --rating N` | Rate an answer; low ratings heal |
//! | `lexcase stats` | Corpus summary |
//! | `lexcase serve` | Start the HTTP server |
//!
//! Logging goes to stderr and is controlled by `RUST_LOG`
//! (default `lexcase=info`).

use anyhow::Context;
use clap::{Parser, Subcommand};
use futures::StreamExt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use lexcase::config::{self, Config};
use lexcase::corpus::CorpusStore;
use lexcase::feedback::{FeedbackHealer, RatingTally};
use lexcase::ingest::run_ingest;
use lexcase::memory::SessionMemory;
use lexcase::models::DEFAULT_USER;
use lexcase::pipeline::AnswerPipeline;
use lexcase::server;

/// lexcase: retrieval-augmented answers over a corpus of legal cases.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. When the file does not exist, built-in defaults are used.
#[derive(Parser)]
#[command(
    name = "lexcase",
    about = "lexcase: retrieval-augmented answers over a corpus of legal cases",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/lexcase.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the corpus file and schema. Safe to run repeatedly.
    Init,

    /// Ingest a PDF, DOCX, text or Markdown file, or a directory of them.
    Ingest {
        /// File or directory to ingest.
        path: PathBuf,
    },

    /// Answer a query against the ingested corpus.
    Ask {
        query: String,

        /// Session id used for case-type memory.
        #[arg(long, default_value = DEFAULT_USER)]
        user: String,

        /// Print the answer fragment by fragment.
        #[arg(long)]
        stream: bool,
    },

    /// Rate an answer. Ratings below `[feedback].heal_below` re-answer a
    /// rewritten query.
    Feedback {
        query: String,

        /// Rating from 1 (poor) to 5 (excellent).
        #[arg(long)]
        rating: u8,

        #[arg(long, default_value = DEFAULT_USER)]
        user: String,
    },

    /// Show corpus size and last ingestion time.
    Stats,

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

/// Load the config file if present, otherwise fall back to defaults
/// (environment overrides still apply).
fn resolve_config(path: &Path) -> anyhow::Result<Config> {
    if path.exists() {
        return config::load_config(path);
    }
    tracing::debug!(path = %path.display(), "config file not found, using defaults");
    let mut cfg = Config::minimal();
    cfg.apply_env_overrides();
    cfg.validate()?;
    Ok(cfg)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("lexcase=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = resolve_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let store = CorpusStore::open(&cfg.corpus.path);
            store
                .init()
                .await
                .with_context(|| format!("Failed to initialize {}", cfg.corpus.path.display()))?;
            println!("Corpus initialized at {}", cfg.corpus.path.display());
        }
        Commands::Ingest { path } => {
            run_ingest(&cfg, &path).await?;
        }
        Commands::Ask {
            query,
            user,
            stream,
        } => {
            let pipeline = build_pipeline(&cfg)?;
            let history = SessionMemory::new().build_history(&user, &query);
            if stream {
                let mut fragments = pipeline.stream(&query, &history).await?;
                let mut stdout = std::io::stdout();
                while let Some(fragment) = fragments.next().await {
                    print!("{}", fragment);
                    stdout.flush()?;
                }
                println!();
            } else {
                let answer = pipeline.answer_with_sources(&query, &history).await?;
                println!("{}", answer.text);
                if !answer.sources.is_empty() {
                    println!("\nSources:");
                    for (i, source) in answer.sources.iter().enumerate() {
                        println!(
                            "  {}. {} (page {})",
                            i + 1,
                            source.source_path,
                            source.page_number
                        );
                    }
                }
            }
        }
        Commands::Feedback {
            query,
            rating,
            user,
        } => {
            let pipeline = build_pipeline(&cfg)?;
            let healer = FeedbackHealer::new(
                pipeline,
                Arc::new(SessionMemory::new()),
                Arc::new(RatingTally::new()),
                &cfg.feedback,
            );
            let outcome = healer.handle(&query, rating, &user).await?;
            match (outcome.answer, outcome.message) {
                (Some(answer), _) => println!("Healed answer:\n{}", answer),
                (None, Some(message)) => println!("{}", message),
                (None, None) => {}
            }
        }
        Commands::Stats => {
            let stats = CorpusStore::open(&cfg.corpus.path).stats().await?;
            println!("Corpus:   {}", cfg.corpus.path.display());
            println!("Chunks:   {}", stats.chunks);
            println!("Sources:  {}", stats.sources);
            match stats.last_ingested_at {
                Some(at) => println!("Last ingest: {}", at.to_rfc3339()),
                None => println!("Last ingest: never"),
            }
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}

fn build_pipeline(cfg: &Config) -> anyhow::Result<Arc<AnswerPipeline>> {
    let store = Arc::new(CorpusStore::open(&cfg.corpus.path));
    Ok(Arc::new(AnswerPipeline::from_config(cfg, store)?))
}
