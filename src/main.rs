//! # Lectern CLI
//!
//! The `lectern` binary is the primary interface to the question-answering
//! engine. It provides commands for index initialization, textbook
//! ingestion, one-shot questions, and starting the HTTP server.
//!
//! ## Usage
//!
//! ```bash
//! lectern --config ./config/lectern.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `lectern init` | Create the vector index collection |
//! | `lectern ingest` | Chunk, embed, and index a textbook file |
//! | `lectern ask "<question>"` | Answer a question from the terminal |
//! | `lectern serve` | Start the HTTP API server |
//!
//! ## Examples
//!
//! ```bash
//! # Create the collection
//! lectern init --config ./config/lectern.toml
//!
//! # Ingest a textbook
//! lectern ingest --file ./books/biology.txt --title "Intro Biology" --section "Full text"
//!
//! # Ask over the whole book
//! lectern ask "What is the role of chlorophyll in photosynthesis?"
//!
//! # Ask about a highlighted passage
//! lectern ask "What does this mean?" --selection "Chlorophyll absorbs red and blue light."
//!
//! # Start the HTTP API
//! lectern serve --config ./config/lectern.toml
//! ```
//!
//! Secrets are taken from the environment: `OPENAI_API_KEY` (required),
//! `QDRANT_API_KEY` (optional), `LECTERN_API_KEY` (optional, enables HTTP
//! authentication).

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use lectern::config;
use lectern::embedding;
use lectern::index::QdrantIndex;
use lectern::ingest::{self, IngestMetadata};
use lectern::models::{Query, QueryMode};
use lectern::pipeline::QueryPipeline;
use lectern::retrieve::Retriever;
use lectern::server;
use lectern::synthesize;

/// Lectern — a grounded question-answering engine for textbook corpora.
#[derive(Parser)]
#[command(
    name = "lectern",
    about = "Lectern — answer questions over a textbook corpus with grounded, cited answers",
    version,
    long_about = "Lectern ingests textbook content into a vector index and answers \
    natural-language questions by retrieving relevant passages and synthesizing an answer \
    that cites them. Exposed as a CLI and a JSON HTTP API."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/lectern.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the vector index collection.
    ///
    /// Creates the configured collection (cosine distance, dimensionality
    /// from `[embedding].dims`) if it does not exist. Idempotent.
    Init,

    /// Ingest a textbook file into the index.
    ///
    /// Reads a plain-text file, splits it into overlapping chunks, embeds
    /// each chunk, and upserts the points into the vector index.
    Ingest {
        /// Path to the textbook file (plain text).
        #[arg(long)]
        file: PathBuf,

        /// Title of the textbook.
        #[arg(long)]
        title: String,

        /// Source label for citations (defaults to the title).
        #[arg(long)]
        source: Option<String>,

        /// Section or chapter name.
        #[arg(long)]
        section: Option<String>,

        /// Page number, when the file corresponds to a known page.
        #[arg(long)]
        page: Option<i64>,
    },

    /// Ask a question and print the answer with its references.
    Ask {
        /// The question text (10–1000 characters).
        question: String,

        /// Answer about this highlighted passage instead of the whole book.
        #[arg(long)]
        selection: Option<String>,

        /// Override the number of passages to retrieve.
        #[arg(long)]
        top_k: Option<usize>,
    },

    /// Start the HTTP API server.
    ///
    /// Binds to the address configured in `[server].bind` and serves
    /// `POST /v1/query`, `POST /v1/query/stream`, and `GET /v1/health`.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let index = QdrantIndex::new(&cfg.index)?;
            index.ensure_collection(cfg.embedding.dims).await?;
            println!("Collection '{}' ready.", cfg.index.collection);
        }
        Commands::Ingest {
            file,
            title,
            source,
            section,
            page,
        } => {
            let embedder = embedding::create_provider(&cfg.embedding)?;
            let index = QdrantIndex::new(&cfg.index)?;

            println!("Ingesting '{}'...", title);
            let written = ingest::ingest_file(
                &cfg,
                embedder.as_ref(),
                &index,
                &file,
                &title,
                &IngestMetadata {
                    source,
                    section,
                    page_number: page,
                },
            )
            .await?;
            println!("Ingested {} chunks from '{}'.", written, title);
        }
        Commands::Ask {
            question,
            selection,
            top_k,
        } => {
            let mode = if selection.is_some() {
                QueryMode::SelectedText
            } else {
                QueryMode::FullBook
            };
            let query = Query::new(question, mode, selection)?;

            let embedder: Arc<dyn embedding::EmbeddingProvider> =
                embedding::create_provider(&cfg.embedding)?.into();
            let completion: Arc<dyn synthesize::CompletionProvider> =
                synthesize::create_provider(&cfg.synthesis)?.into();
            let index = Arc::new(QdrantIndex::new(&cfg.index)?);

            let pipeline = QueryPipeline::new(
                embedder,
                index,
                completion,
                Retriever::new(top_k.unwrap_or(cfg.retrieval.top_k)),
            );

            let answer = pipeline.process(query).await?;

            println!("{}", answer.content);
            println!();
            println!("References:");
            for (i, r) in answer.references.iter().enumerate() {
                println!(
                    "{}. {} / {} (p. {})",
                    i + 1,
                    r.source,
                    r.section,
                    r.page_number
                );
                println!("    \"{}\"", r.text_preview.replace('\n', " "));
            }
            println!();
            println!("Confidence: {:.2}", answer.confidence_score);
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
