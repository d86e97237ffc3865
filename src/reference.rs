//! Citation extraction from retrieved chunks.
//!
//! Converts raw retrieval results into validated [`Reference`] records:
//! one reference per chunk, in retrieval order, with no filtering or
//! deduplication. Missing metadata fields fall back to documented sentinel
//! values rather than failing. Both functions are pure.

use crate::models::{Reference, RetrievedChunk};

/// Maximum preview length in characters.
pub const PREVIEW_MAX_CHARS: usize = 100;

/// Sentinel source for chunks indexed without one.
pub const DEFAULT_SOURCE: &str = "textbook";
/// Sentinel section for chunks indexed without one.
pub const DEFAULT_SECTION: &str = "Unknown Section";
/// Sentinel page number for chunks indexed without one.
pub const DEFAULT_PAGE_NUMBER: i64 = 1;

/// Build one [`Reference`] per chunk, preserving input order.
pub fn build_references(chunks: &[RetrievedChunk]) -> Vec<Reference> {
    chunks
        .iter()
        .map(|chunk| Reference {
            source: chunk
                .metadata
                .source
                .clone()
                .unwrap_or_else(|| DEFAULT_SOURCE.to_string()),
            page_number: chunk.metadata.page_number.unwrap_or(DEFAULT_PAGE_NUMBER),
            section: chunk
                .metadata
                .section
                .clone()
                .unwrap_or_else(|| DEFAULT_SECTION.to_string()),
            text_preview: preview(&chunk.content),
        })
        .collect()
}

/// True iff the list is non-empty and every reference has a non-empty
/// source and section.
pub fn validate_references(references: &[Reference]) -> bool {
    if references.is_empty() {
        return false;
    }

    references
        .iter()
        .all(|r| !r.source.is_empty() && !r.section.is_empty())
}

/// Bounded text preview: the first [`PREVIEW_MAX_CHARS`] characters,
/// with `...` appended when the content was truncated.
fn preview(content: &str) -> String {
    if content.chars().count() > PREVIEW_MAX_CHARS {
        let mut p: String = content.chars().take(PREVIEW_MAX_CHARS).collect();
        p.push_str("...");
        p
    } else {
        content.to_string()
    }
}
