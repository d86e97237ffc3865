//! Typed error taxonomy for the query pipeline.
//!
//! Every failure the pipeline can surface maps onto exactly one of these
//! kinds. Validation errors are raised before any provider is contacted;
//! the three provider kinds wrap upstream-dependency failures; and
//! [`QueryError::IncompleteAnswer`] marks the internal invariant violation
//! of an answer that cites nothing. None are recovered locally — each stage
//! failure propagates straight to the caller as a failed query.

use thiserror::Error;

/// Failure of a single query's processing run.
#[derive(Debug, Error)]
pub enum QueryError {
    /// The query failed precondition checks before any stage ran.
    #[error("invalid query: {0}")]
    Validation(String),

    /// The embedding provider was unreachable or rejected the input.
    #[error("embedding provider: {0}")]
    EmbeddingProvider(String),

    /// The vector index lookup failed.
    #[error("retrieval: {0}")]
    Retrieval(String),

    /// The completion provider was unreachable or returned an error.
    #[error("synthesis provider: {0}")]
    SynthesisProvider(String),

    /// The assembled answer carried no valid references.
    #[error("answer cites no textbook content")]
    IncompleteAnswer,
}

impl QueryError {
    /// Stable machine-readable tag for logs and API error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            QueryError::Validation(_) => "validation",
            QueryError::EmbeddingProvider(_) => "embedding_provider",
            QueryError::Retrieval(_) => "retrieval",
            QueryError::SynthesisProvider(_) => "synthesis_provider",
            QueryError::IncompleteAnswer => "incomplete_answer",
        }
    }

    pub(crate) fn embedding(err: impl std::fmt::Display) -> Self {
        QueryError::EmbeddingProvider(err.to_string())
    }

    pub(crate) fn retrieval(err: impl std::fmt::Display) -> Self {
        QueryError::Retrieval(err.to_string())
    }

    pub(crate) fn synthesis(err: impl std::fmt::Display) -> Self {
        QueryError::SynthesisProvider(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_tags_are_stable() {
        assert_eq!(QueryError::Validation("x".into()).kind(), "validation");
        assert_eq!(
            QueryError::EmbeddingProvider("x".into()).kind(),
            "embedding_provider"
        );
        assert_eq!(QueryError::Retrieval("x".into()).kind(), "retrieval");
        assert_eq!(
            QueryError::SynthesisProvider("x".into()).kind(),
            "synthesis_provider"
        );
        assert_eq!(QueryError::IncompleteAnswer.kind(), "incomplete_answer");
    }
}
