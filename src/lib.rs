//! # Lectern
//!
//! A grounded question-answering engine for textbook corpora.
//!
//! Lectern answers natural-language questions by retrieving semantically
//! relevant passages from an ingested textbook and synthesizing an answer
//! that cites them. Every completed answer carries at least one reference;
//! an answer that cannot be grounded is rejected rather than returned.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────┐   ┌───────────┐
//! │ Ingest   │──▶│ Embedder  │──▶│  Vector    │
//! │ chunk+id │   │ (OpenAI)  │   │  Index     │
//! └──────────┘   └───────────┘   │ (Qdrant)   │
//!                                └─────┬──────┘
//!                     query            │ top-k chunks
//!                       │              ▼
//!                  ┌────┴─────────────────────┐
//!                  │      QueryPipeline       │
//!                  │ embed → retrieve →       │
//!                  │ synthesize → score →     │
//!                  │ cite                     │
//!                  └────┬─────────────┬───────┘
//!                       ▼             ▼
//!                  ┌─────────┐   ┌─────────┐
//!                  │   CLI   │   │  HTTP   │
//!                  │(lectern)│   │ (axum)  │
//!                  └─────────┘   └─────────┘
//! ```
//!
//! ## Query Modes
//!
//! - **Full book** — the question itself is embedded and matched against
//!   the whole corpus.
//! - **Selected text** — the user's highlighted span is embedded instead,
//!   anchoring retrieval to the selection.
//!
//! ## Quick Start
//!
//! ```bash
//! lectern init                               # create the index collection
//! lectern ingest --file book.txt --title "Intro Biology"
//! lectern ask "What is photosynthesis?"
//! lectern serve                              # start the HTTP API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types and query validation |
//! | [`error`] | Typed pipeline error taxonomy |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`index`] | Vector index abstraction (Qdrant, in-memory) |
//! | [`retrieve`] | Mode-dependent nearest-neighbor retrieval |
//! | [`reference`] | Citation extraction and validation |
//! | [`confidence`] | Answer confidence heuristic |
//! | [`synthesize`] | Grounded answer synthesis, whole and streamed |
//! | [`pipeline`] | Query orchestration state machine |
//! | [`chunking`] | Overlapping-window text chunking |
//! | [`ingest`] | Offline ingestion pipeline |
//! | [`rate_limit`] | Sliding-window request limiter |
//! | [`server`] | HTTP API server |

pub mod chunking;
pub mod confidence;
pub mod config;
pub mod embedding;
pub mod error;
pub mod index;
pub mod ingest;
pub mod models;
pub mod pipeline;
pub mod rate_limit;
pub mod reference;
pub mod retrieve;
pub mod server;
pub mod synthesize;
