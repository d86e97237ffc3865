//! Mode-dependent nearest-neighbor retrieval.
//!
//! The retriever decides *which* text is embedded for the index lookup:
//!
//! - [`QueryMode::FullBook`] embeds the question itself and searches the
//!   whole corpus.
//! - [`QueryMode::SelectedText`] embeds the user's highlighted span when one
//!   is present, anchoring results to the selection rather than the
//!   open-ended question (direct-context injection). An empty or missing
//!   selection falls back to the question text.
//!
//! Results come back in the index's own descending-similarity order; ties
//! are not re-ordered.

use crate::embedding::EmbeddingProvider;
use crate::error::QueryError;
use crate::index::VectorIndex;
use crate::models::{Query, QueryMode, RetrievedChunk};

/// Default number of nearest neighbors to retrieve.
pub const DEFAULT_TOP_K: usize = 5;

/// Executes mode-specific retrieval against a vector index.
#[derive(Debug, Clone, Copy)]
pub struct Retriever {
    top_k: usize,
}

impl Retriever {
    pub fn new(top_k: usize) -> Self {
        Self { top_k }
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    /// The text that will be embedded for the index lookup.
    ///
    /// This is the mode decision point; the match is exhaustive so a new
    /// mode cannot be added without revisiting it.
    pub fn search_text<'a>(&self, query: &'a Query) -> &'a str {
        match query.mode {
            QueryMode::FullBook => &query.text,
            QueryMode::SelectedText => match query.selected_text.as_deref() {
                Some(selection) if !selection.trim().is_empty() => selection,
                // Fall back to the question when the selection is empty
                _ => &query.text,
            },
        }
    }

    /// Embed the mode-selected text.
    pub async fn embed_target(
        &self,
        query: &Query,
        embedder: &dyn EmbeddingProvider,
    ) -> Result<Vec<f32>, QueryError> {
        embedder
            .embed(self.search_text(query))
            .await
            .map_err(QueryError::embedding)
    }

    /// Search the index with an already-computed vector.
    ///
    /// An index holding fewer than `top_k` entries returns all of them.
    pub async fn search(
        &self,
        vector: &[f32],
        index: &dyn VectorIndex,
    ) -> Result<Vec<RetrievedChunk>, QueryError> {
        index
            .search(vector, self.top_k)
            .await
            .map_err(QueryError::retrieval)
    }

    /// Full retrieval: embed the mode-selected text, then search.
    pub async fn retrieve(
        &self,
        query: &Query,
        embedder: &dyn EmbeddingProvider,
        index: &dyn VectorIndex,
    ) -> Result<Vec<RetrievedChunk>, QueryError> {
        let vector = self.embed_target(query, embedder).await?;
        self.search(&vector, index).await
    }
}

impl Default for Retriever {
    fn default() -> Self {
        Self::new(DEFAULT_TOP_K)
    }
}
