//! HTTP API server.
//!
//! Exposes the query pipeline over a thin JSON HTTP surface. All decision
//! logic lives in the pipeline; handlers only authenticate, rate-limit,
//! translate between wire shapes and core types, and map error kinds to
//! status codes.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/v1/query` | Answer a question, JSON response with citations |
//! | `POST` | `/v1/query/stream` | Answer a question as an SSE token stream |
//! | `GET`  | `/v1/health` | Health check (returns version) |
//!
//! # Authentication
//!
//! When the `LECTERN_API_KEY` environment variable is set at startup, every
//! query request must carry it in the `X-API-Key` header; mismatches get
//! `401`. The key doubles as the rate-limit identity.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query text must be ..." } }
//! ```
//!
//! Codes: `bad_request` (400), `unauthorized` (401), `rate_limited` (429),
//! `upstream_error` (502), `incomplete_answer` (500), `internal` (500).
//!
//! # Streaming
//!
//! `POST /v1/query/stream` responds with Server-Sent Events:
//! `token` events carry answer fragments, a final `done` event carries the
//! references and the confidence score computed over the full text, and an
//! `error` event terminates the stream on a mid-synthesis provider failure.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::config::Config;
use crate::confidence;
use crate::embedding;
use crate::error::QueryError;
use crate::index::QdrantIndex;
use crate::models::{Query, QueryMode, Reference};
use crate::pipeline::{QueryPipeline, StreamedAnswer};
use crate::rate_limit::RateLimiter;
use crate::retrieve::Retriever;
use crate::synthesize::{self, SynthesisEvent};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pipeline: Arc<QueryPipeline>,
    limiter: Arc<RateLimiter>,
    /// Expected `X-API-Key` value; `None` disables authentication.
    api_key: Option<Arc<str>>,
}

impl AppState {
    pub fn new(
        pipeline: Arc<QueryPipeline>,
        limiter: Arc<RateLimiter>,
        api_key: Option<String>,
    ) -> Self {
        Self {
            pipeline,
            limiter,
            api_key: api_key.map(Into::into),
        }
    }
}

/// Starts the HTTP server.
///
/// Builds the providers and pipeline from config, binds to `[server].bind`,
/// and serves until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let embedder: Arc<dyn embedding::EmbeddingProvider> =
        embedding::create_provider(&config.embedding)?.into();
    let completion: Arc<dyn synthesize::CompletionProvider> =
        synthesize::create_provider(&config.synthesis)?.into();
    let index = Arc::new(QdrantIndex::new(&config.index)?);

    let pipeline = Arc::new(QueryPipeline::new(
        embedder,
        index,
        completion,
        Retriever::new(config.retrieval.top_k),
    ));

    let limiter = Arc::new(RateLimiter::new(
        config.server.rate_limit_requests,
        Duration::from_secs(config.server.rate_limit_window_secs),
    ));

    let state = AppState::new(pipeline, limiter, std::env::var("LECTERN_API_KEY").ok());

    let bind_addr = config.server.bind.clone();
    let app = router(state);

    info!("listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/v1/query", post(handle_query))
        .route("/v1/query/stream", post(handle_query_stream))
        .route("/v1/health", get(handle_health))
        .layer(cors)
        .with_state(state)
}

// ============ Error response ============

/// JSON error response body.
#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    /// Machine-readable error code (e.g., `"bad_request"`).
    code: String,
    /// Human-readable error message.
    message: String,
}

/// Internal error type that converts into an HTTP response.
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn unauthorized() -> AppError {
    AppError {
        status: StatusCode::UNAUTHORIZED,
        code: "unauthorized".to_string(),
        message: "Invalid API key".to_string(),
    }
}

fn rate_limited() -> AppError {
    AppError {
        status: StatusCode::TOO_MANY_REQUESTS,
        code: "rate_limited".to_string(),
        message: "Rate limit exceeded. Please try again later.".to_string(),
    }
}

impl From<QueryError> for AppError {
    fn from(err: QueryError) -> Self {
        let (status, code) = match &err {
            QueryError::Validation(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            QueryError::EmbeddingProvider(_)
            | QueryError::Retrieval(_)
            | QueryError::SynthesisProvider(_) => (StatusCode::BAD_GATEWAY, "upstream_error"),
            QueryError::IncompleteAnswer => {
                (StatusCode::INTERNAL_SERVER_ERROR, "incomplete_answer")
            }
        };

        AppError {
            status,
            code: code.to_string(),
            message: err.to_string(),
        }
    }
}

// ============ Request guards ============

/// Verify the `X-API-Key` header and return the rate-limit identity.
fn authorize(state: &AppState, headers: &HeaderMap) -> Result<String, AppError> {
    match &state.api_key {
        None => Ok("anonymous".to_string()),
        Some(expected) => {
            let provided = headers.get("X-API-Key").and_then(|v| v.to_str().ok());
            match provided {
                Some(key) if key == expected.as_ref() => Ok(key.to_string()),
                _ => Err(unauthorized()),
            }
        }
    }
}

fn check_rate_limit(state: &AppState, identity: &str) -> Result<(), AppError> {
    if state.limiter.check(identity) {
        Ok(())
    } else {
        Err(rate_limited())
    }
}

// ============ GET /v1/health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /v1/query ============

/// Wire shape of a query request.
#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub query: String,
    pub mode: QueryMode,
    #[serde(default)]
    pub selected_text: Option<String>,
}

/// Wire shape of a completed answer.
#[derive(Debug, Serialize)]
pub struct QueryResponse {
    pub response: String,
    pub references: Vec<Reference>,
    pub query_id: String,
    pub confidence_score: f64,
}

async fn handle_query(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, AppError> {
    let identity = authorize(&state, &headers)?;
    check_rate_limit(&state, &identity)?;

    let query = Query::new(request.query, request.mode, request.selected_text)?;
    let answer = state.pipeline.process(query).await?;

    Ok(Json(QueryResponse {
        response: answer.content,
        references: answer.references,
        query_id: answer.query_id.to_string(),
        confidence_score: answer.confidence_score,
    }))
}

// ============ POST /v1/query/stream ============

async fn handle_query_stream(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<QueryRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let identity = authorize(&state, &headers)?;
    check_rate_limit(&state, &identity)?;

    let query = Query::new(request.query, request.mode, request.selected_text)?;
    let streamed = state.pipeline.process_stream(query).await?;

    Ok(Sse::new(sse_events(streamed)).keep_alive(KeepAlive::default()))
}

/// Bridge the pipeline's fragment channel to SSE frames, accumulating the
/// text so the terminal `done` event can carry the confidence score.
fn sse_events(streamed: StreamedAnswer) -> ReceiverStream<Result<Event, Infallible>> {
    let StreamedAnswer {
        query_id,
        references,
        chunks,
        mut events,
    } = streamed;

    let (tx, rx) = mpsc::channel(32);

    tokio::spawn(async move {
        let mut text = String::new();

        while let Some(event) = events.recv().await {
            let frame = match event {
                SynthesisEvent::Fragment(fragment) => {
                    text.push_str(&fragment);
                    Event::default()
                        .event("token")
                        .data(serde_json::json!({ "token": fragment }).to_string())
                }
                SynthesisEvent::Done => {
                    let confidence_score = confidence::score(&chunks, &text);
                    let frame = Event::default().event("done").data(
                        serde_json::json!({
                            "query_id": query_id.to_string(),
                            "references": &references,
                            "confidence_score": confidence_score,
                        })
                        .to_string(),
                    );
                    let _ = tx.send(Ok(frame)).await;
                    return;
                }
                SynthesisEvent::Error(message) => {
                    let frame = Event::default()
                        .event("error")
                        .data(serde_json::json!({ "error": message }).to_string());
                    let _ = tx.send(Ok(frame)).await;
                    return;
                }
            };

            if tx.send(Ok(frame)).await.is_err() {
                // Client disconnected; dropping `events` cancels synthesis
                return;
            }
        }
    });

    ReceiverStream::new(rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_error_status_mapping() {
        let e: AppError = QueryError::Validation("too short".into()).into();
        assert_eq!(e.status, StatusCode::BAD_REQUEST);
        assert_eq!(e.code, "bad_request");

        let e: AppError = QueryError::Retrieval("index down".into()).into();
        assert_eq!(e.status, StatusCode::BAD_GATEWAY);
        assert_eq!(e.code, "upstream_error");

        let e: AppError = QueryError::IncompleteAnswer.into();
        assert_eq!(e.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(e.code, "incomplete_answer");
    }

    #[test]
    fn test_query_request_wire_format() {
        let req: QueryRequest = serde_json::from_str(
            r#"{ "query": "What is osmosis?", "mode": "SELECTED_TEXT", "selected_text": "Osmosis is..." }"#,
        )
        .unwrap();
        assert_eq!(req.mode, QueryMode::SelectedText);
        assert_eq!(req.selected_text.as_deref(), Some("Osmosis is..."));

        let req: QueryRequest =
            serde_json::from_str(r#"{ "query": "What is osmosis?", "mode": "FULL_BOOK" }"#)
                .unwrap();
        assert_eq!(req.mode, QueryMode::FullBook);
        assert!(req.selected_text.is_none());
    }
}
