//! Textbook ingestion pipeline.
//!
//! The offline producer of everything the query pipeline consumes:
//! chunk the raw text into overlapping windows, attach metadata, embed the
//! windows in batches, and upsert the points into the vector index. The
//! index is eventually consistent, so freshly ingested content may take a
//! moment to become searchable.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::path::Path;
use uuid::Uuid;

use crate::chunking::chunk_text;
use crate::config::Config;
use crate::embedding::EmbeddingProvider;
use crate::index::{IndexPoint, VectorIndex};
use crate::models::ChunkMetadata;

/// Descriptive fields applied to every chunk of one ingested text.
#[derive(Debug, Clone, Default)]
pub struct IngestMetadata {
    /// Source label for citations. Defaults to the title when absent.
    pub source: Option<String>,
    /// Section or chapter name.
    pub section: Option<String>,
    /// Page number, when the input corresponds to a known page.
    pub page_number: Option<i64>,
}

/// Ingest a whole textbook (or a section of one) into the index.
///
/// Returns the number of chunks written.
pub async fn ingest_textbook(
    config: &Config,
    embedder: &dyn EmbeddingProvider,
    index: &dyn VectorIndex,
    title: &str,
    content: &str,
    meta: &IngestMetadata,
) -> Result<usize> {
    let windows = chunk_text(content, config.chunking.size, config.chunking.overlap);
    if windows.is_empty() {
        println!("Nothing to ingest: '{}' produced no chunks.", title);
        return Ok(0);
    }

    let total = windows.len();
    let slug = slugify(title);
    let source = meta.source.clone().unwrap_or_else(|| title.to_string());

    let mut written = 0;

    for (batch_index, batch) in windows.chunks(config.embedding.batch_size).enumerate() {
        let texts: Vec<String> = batch.to_vec();
        let vectors = embedder
            .embed_many(&texts)
            .await
            .with_context(|| format!("embedding batch {} of '{}'", batch_index, title))?;

        let points: Vec<IndexPoint> = texts
            .iter()
            .zip(vectors)
            .enumerate()
            .map(|(i, (text, vector))| {
                let chunk_index = (batch_index * config.embedding.batch_size + i) as i64;
                IndexPoint {
                    id: chunk_point_id(&slug, chunk_index),
                    vector,
                    content: text.clone(),
                    metadata: ChunkMetadata {
                        source: Some(source.clone()),
                        section: meta.section.clone(),
                        page_number: meta.page_number,
                        chunk_index: Some(chunk_index),
                        total_chunks: Some(total as i64),
                    },
                }
            })
            .collect();

        index
            .upsert(&points)
            .await
            .with_context(|| format!("indexing batch {} of '{}'", batch_index, title))?;

        written += points.len();
        println!("  {}/{} chunks indexed", written, total);
    }

    Ok(written)
}

/// Ingest a textbook from a plain-text file.
pub async fn ingest_file(
    config: &Config,
    embedder: &dyn EmbeddingProvider,
    index: &dyn VectorIndex,
    path: &Path,
    title: &str,
    meta: &IngestMetadata,
) -> Result<usize> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read file: {}", path.display()))?;

    ingest_textbook(config, embedder, index, title, &content, meta).await
}

/// Lowercase the title and replace whitespace runs with underscores.
fn slugify(title: &str) -> String {
    title
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
}

/// Deterministic point id for a chunk: a UUID derived from the title slug
/// and chunk index, so re-ingesting the same text replaces its points
/// instead of duplicating them.
fn chunk_point_id(slug: &str, chunk_index: i64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(slug.as_bytes());
    hasher.update(b":");
    hasher.update(chunk_index.to_le_bytes());
    let hash = hasher.finalize();

    // A SHA-256 digest always has enough bytes for a UUID
    Uuid::from_slice(&hash[..16]).unwrap().to_string()
}
