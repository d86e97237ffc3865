//! Query orchestration state machine.
//!
//! Sequences one query through
//! `Created → Embedding → Retrieving → Synthesizing → Scoring → Completed`,
//! with `Failed` reachable from any non-terminal stage. Stages are strictly
//! sequential: each awaits the previous one, a stage failure aborts every
//! later stage, and nothing is retried here — retries, if any, belong to
//! the provider clients.
//!
//! Two invariants are enforced at the edges:
//!
//! - validation happens before `Created` — a malformed request never
//!   reaches a provider (the [`Query`] constructor is that gate);
//! - before `Completed`, the assembled answer must carry a non-empty,
//!   valid reference list, otherwise the run fails with
//!   [`QueryError::IncompleteAnswer`] rather than returning a citation-less
//!   answer.
//!
//! Each query runs on its own task; the pipeline holds no per-query mutable
//! state, so independent queries proceed fully in parallel over the shared
//! providers.

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::confidence;
use crate::embedding::EmbeddingProvider;
use crate::error::QueryError;
use crate::index::VectorIndex;
use crate::models::{Answer, Query, QueryStatus, Reference, RetrievedChunk};
use crate::reference::{build_references, validate_references};
use crate::retrieve::Retriever;
use crate::synthesize::{self, CompletionProvider, SynthesisEvent};

/// Processing stage of a single query run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Created,
    Embedding,
    Retrieving,
    Synthesizing,
    Scoring,
    Completed,
    Failed,
}

impl Stage {
    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Completed | Stage::Failed)
    }

    /// Legal transitions: one step forward along the sequence, or `Failed`
    /// from any non-terminal stage. No skipping, no re-entry.
    pub fn can_advance_to(self, next: Stage) -> bool {
        use Stage::*;
        matches!(
            (self, next),
            (Created, Embedding)
                | (Embedding, Retrieving)
                | (Retrieving, Synthesizing)
                | (Synthesizing, Scoring)
                | (Scoring, Completed)
        ) || (!self.is_terminal() && next == Failed)
    }
}

/// Per-run stage tracker. Advancing to an illegal stage is a programming
/// error, caught in debug builds.
struct Run {
    query_id: Uuid,
    stage: Stage,
}

impl Run {
    fn new(query_id: Uuid) -> Self {
        Self {
            query_id,
            stage: Stage::Created,
        }
    }

    fn advance(&mut self, next: Stage) {
        debug_assert!(
            self.stage.can_advance_to(next),
            "illegal stage transition {:?} -> {:?}",
            self.stage,
            next
        );
        debug!(query_id = %self.query_id, from = ?self.stage, to = ?next, "stage transition");
        self.stage = next;
    }

    fn fail(&mut self, err: &QueryError) {
        warn!(
            query_id = %self.query_id,
            stage = ?self.stage,
            kind = err.kind(),
            error = %err,
            "query failed"
        );
        self.stage = Stage::Failed;
    }
}

/// A streaming run: references and evidence resolved up front, answer text
/// arriving incrementally through the event channel.
pub struct StreamedAnswer {
    pub query_id: Uuid,
    pub references: Vec<Reference>,
    /// The evidence chunks, kept so the consumer can score the final text.
    pub chunks: Vec<RetrievedChunk>,
    pub events: mpsc::Receiver<SynthesisEvent>,
}

/// The query pipeline: embedder + index + completion provider, wired
/// together behind the stage machine.
pub struct QueryPipeline {
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
    completion: Arc<dyn CompletionProvider>,
    retriever: Retriever,
}

impl QueryPipeline {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn VectorIndex>,
        completion: Arc<dyn CompletionProvider>,
        retriever: Retriever,
    ) -> Self {
        Self {
            embedder,
            index,
            completion,
            retriever,
        }
    }

    /// Process a query to a completed, cited answer.
    pub async fn process(&self, mut query: Query) -> Result<Answer, QueryError> {
        info!(query_id = %query.id, mode = ?query.mode, "processing query");
        let mut run = Run::new(query.id);
        query.advance_status(QueryStatus::Processing);

        let result = self.run_stages(&query, &mut run).await;

        match result {
            Ok(answer) => {
                run.advance(Stage::Completed);
                query.advance_status(QueryStatus::Completed);
                info!(
                    query_id = %query.id,
                    confidence = answer.confidence_score,
                    references = answer.references.len(),
                    "query completed"
                );
                Ok(answer)
            }
            Err(err) => {
                run.fail(&err);
                Err(err)
            }
        }
    }

    async fn run_stages(&self, query: &Query, run: &mut Run) -> Result<Answer, QueryError> {
        run.advance(Stage::Embedding);
        let vector = self
            .retriever
            .embed_target(query, self.embedder.as_ref())
            .await?;

        run.advance(Stage::Retrieving);
        let chunks = self.retriever.search(&vector, self.index.as_ref()).await?;
        debug!(query_id = %query.id, chunks = chunks.len(), "retrieved context");

        run.advance(Stage::Synthesizing);
        let content = synthesize::synthesize(self.completion.as_ref(), &query.text, &chunks).await?;

        run.advance(Stage::Scoring);
        let confidence_score = confidence::score(&chunks, &content);

        let references = build_references(&chunks);
        if !validate_references(&references) {
            return Err(QueryError::IncompleteAnswer);
        }

        Ok(Answer {
            id: Uuid::new_v4(),
            query_id: query.id,
            content,
            references,
            confidence_score,
            created_at: chrono::Utc::now(),
        })
    }

    /// Process a query up to synthesis, then hand back a fragment stream.
    ///
    /// Embedding, retrieval, and the citation invariant are resolved before
    /// any fragment flows: a query whose evidence yields no valid
    /// references fails here with [`QueryError::IncompleteAnswer`] instead
    /// of streaming an answer that cannot be cited. Dropping the returned
    /// receiver cancels the synthesis stream.
    pub async fn process_stream(&self, mut query: Query) -> Result<StreamedAnswer, QueryError> {
        info!(query_id = %query.id, mode = ?query.mode, "processing streaming query");
        let mut run = Run::new(query.id);
        query.advance_status(QueryStatus::Processing);

        run.advance(Stage::Embedding);
        let vector = match self
            .retriever
            .embed_target(&query, self.embedder.as_ref())
            .await
        {
            Ok(v) => v,
            Err(err) => {
                run.fail(&err);
                return Err(err);
            }
        };

        run.advance(Stage::Retrieving);
        let chunks = match self.retriever.search(&vector, self.index.as_ref()).await {
            Ok(c) => c,
            Err(err) => {
                run.fail(&err);
                return Err(err);
            }
        };

        let references = build_references(&chunks);
        if !validate_references(&references) {
            let err = QueryError::IncompleteAnswer;
            run.fail(&err);
            return Err(err);
        }

        run.advance(Stage::Synthesizing);
        let events =
            match synthesize::synthesize_stream(self.completion.as_ref(), &query.text, &chunks)
                .await
            {
                Ok(rx) => rx,
                Err(err) => {
                    run.fail(&err);
                    return Err(err);
                }
            };

        Ok(StreamedAnswer {
            query_id: query.id,
            references,
            chunks,
            events,
        })
    }
}
