//! Core data models for the question-answering pipeline.
//!
//! These types represent the queries, retrieved chunks, references, and
//! answers that flow through the retrieval and synthesis pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::QueryError;

/// Minimum accepted query length (characters, after trimming).
pub const MIN_QUERY_LEN: usize = 10;
/// Maximum accepted query length (characters, after trimming).
pub const MAX_QUERY_LEN: usize = 1000;

/// Retrieval strategy for a query.
///
/// Represented as a closed enum so the retriever can match exhaustively;
/// the wire format keeps the upper-snake spelling of the public API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueryMode {
    /// Search the whole corpus with the question itself.
    FullBook,
    /// Anchor retrieval to a user-highlighted span of the book.
    SelectedText,
}

/// Public lifecycle of a query. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueryStatus {
    Created,
    Processing,
    Completed,
}

/// A validated question over the corpus.
///
/// Construction via [`Query::new`] is the validation boundary: a `Query`
/// value only exists if its text length and mode preconditions hold, so no
/// provider is ever contacted on behalf of a malformed request. The value is
/// immutable after creation except for monotonic status transitions.
#[derive(Debug, Clone, Serialize)]
pub struct Query {
    pub id: Uuid,
    pub text: String,
    pub mode: QueryMode,
    pub selected_text: Option<String>,
    pub created_at: DateTime<Utc>,
    status: QueryStatus,
}

impl Query {
    /// Validate and construct a query.
    ///
    /// Preconditions (checked before anything else runs):
    /// - trimmed text length in `[10, 1000]`;
    /// - `SelectedText` mode requires a selection that is non-empty after
    ///   trimming.
    pub fn new(
        text: impl Into<String>,
        mode: QueryMode,
        selected_text: Option<String>,
    ) -> Result<Self, QueryError> {
        let text = text.into().trim().to_string();

        // Length bounds are in characters, not bytes
        let len = text.chars().count();
        if len < MIN_QUERY_LEN || len > MAX_QUERY_LEN {
            return Err(QueryError::Validation(format!(
                "query text must be between {} and {} characters, got {}",
                MIN_QUERY_LEN, MAX_QUERY_LEN, len
            )));
        }

        if mode == QueryMode::SelectedText {
            let has_selection = selected_text
                .as_deref()
                .map(|s| !s.trim().is_empty())
                .unwrap_or(false);
            if !has_selection {
                return Err(QueryError::Validation(
                    "selected text is required for SELECTED_TEXT mode".to_string(),
                ));
            }
        }

        Ok(Self {
            id: Uuid::new_v4(),
            text,
            mode,
            selected_text,
            created_at: Utc::now(),
            status: QueryStatus::Created,
        })
    }

    pub fn status(&self) -> QueryStatus {
        self.status
    }

    /// Advance the lifecycle status. Backward transitions are ignored —
    /// the status only ever moves `Created → Processing → Completed`.
    pub fn advance_status(&mut self, next: QueryStatus) {
        if next > self.status {
            self.status = next;
        }
    }
}

/// Structured payload metadata attached to an indexed chunk.
///
/// All fields are optional at the index boundary; the reference builder
/// substitutes documented sentinels for anything missing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_number: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_index: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_chunks: Option<i64>,
}

/// A candidate passage returned by the vector index.
///
/// The score is whatever the index reports (higher = more similar); it is
/// only compared, never interpreted. Consumed read-only downstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub id: String,
    pub content: String,
    /// Similarity score from the index, when it provides one.
    pub score: Option<f32>,
    #[serde(default)]
    pub metadata: ChunkMetadata,
}

/// A citation derived from a retrieved chunk's metadata and content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    pub source: String,
    pub page_number: i64,
    pub section: String,
    pub text_preview: String,
}

/// A completed answer: generated text, its citations, and a confidence
/// estimate. Invariant: `references` is non-empty — an answer that cites
/// nothing is never returned to a caller.
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub id: Uuid,
    pub query_id: Uuid,
    pub content: String,
    pub references: Vec<Reference>,
    pub confidence_score: f64,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_text_too_short() {
        let err = Query::new("short", QueryMode::FullBook, None).unwrap_err();
        assert!(matches!(err, QueryError::Validation(_)));
    }

    #[test]
    fn test_query_text_trimmed_before_length_check() {
        // 8 non-space characters padded with whitespace must still fail
        let err = Query::new("  12345678  \n", QueryMode::FullBook, None).unwrap_err();
        assert!(matches!(err, QueryError::Validation(_)));
    }

    #[test]
    fn test_query_text_too_long() {
        let long = "x".repeat(1001);
        let err = Query::new(long, QueryMode::FullBook, None).unwrap_err();
        assert!(matches!(err, QueryError::Validation(_)));
    }

    #[test]
    fn test_query_boundary_lengths_accepted() {
        assert!(Query::new("x".repeat(10), QueryMode::FullBook, None).is_ok());
        assert!(Query::new("x".repeat(1000), QueryMode::FullBook, None).is_ok());
    }

    #[test]
    fn test_selected_text_mode_requires_selection() {
        let err = Query::new(
            "What does this passage mean?",
            QueryMode::SelectedText,
            None,
        )
        .unwrap_err();
        assert!(matches!(err, QueryError::Validation(_)));

        let err = Query::new(
            "What does this passage mean?",
            QueryMode::SelectedText,
            Some("   ".to_string()),
        )
        .unwrap_err();
        assert!(matches!(err, QueryError::Validation(_)));

        assert!(Query::new(
            "What does this passage mean?",
            QueryMode::SelectedText,
            Some("The mitochondria is the powerhouse of the cell.".to_string()),
        )
        .is_ok());
    }

    #[test]
    fn test_status_only_moves_forward() {
        let mut q = Query::new("What is photosynthesis?", QueryMode::FullBook, None).unwrap();
        assert_eq!(q.status(), QueryStatus::Created);

        q.advance_status(QueryStatus::Processing);
        assert_eq!(q.status(), QueryStatus::Processing);

        // Backward transition is a no-op
        q.advance_status(QueryStatus::Created);
        assert_eq!(q.status(), QueryStatus::Processing);

        q.advance_status(QueryStatus::Completed);
        assert_eq!(q.status(), QueryStatus::Completed);
    }

    #[test]
    fn test_mode_wire_format() {
        let json = serde_json::to_string(&QueryMode::FullBook).unwrap();
        assert_eq!(json, "\"FULL_BOOK\"");
        let mode: QueryMode = serde_json::from_str("\"SELECTED_TEXT\"").unwrap();
        assert_eq!(mode, QueryMode::SelectedText);
    }
}
