//! # docrag
//!
//! Per-user document and image ingestion with retrieval-augmented
//! question answering.
//!
//! ```text
//! upload ─▶ extract ─▶ summarize (streamed) ─▶ queue ─▶ IngestionPipeline
//!                                                     ├─▶ DocumentStore (SQLite)
//!                                                     └─▶ VectorIndex (OpenSearch)
//! ask ─▶ SmartRetriever ─▶ RAG prompt ─▶ LLM (streamed)
//! ```
//!
//! The store-independent logic (chunking, consistency, retrieval,
//! ingestion) lives in `docrag-core`; this crate supplies the concrete
//! backends and the HTTP service.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`logging`] | tracing subscriber setup |
//! | [`retry`] | Exponential backoff for transient failures |
//! | [`http`] | Retrying reqwest client |
//! | [`db`] | SQLite connection pool with WAL mode |
//! | [`migrate`] | Document-store schema (idempotent) |
//! | [`docstore`] | SQLite `DocumentStore` |
//! | [`opensearch`] | OpenSearch text and image k-NN indices |
//! | [`embedding`] | OpenAI, Ollama, local and hashing embedders |
//! | [`llm`] | Streaming chat completions and image captioning |
//! | [`extract`] | PDF, DOCX, text and image intake |
//! | [`context`] | Shared service state |
//! | [`worker`] | Background ingestion pool |
//! | [`orchestrator`] | Upload event stream and answer stream |
//! | [`server`] | axum routes |

pub mod config;
pub mod context;
pub mod db;
pub mod docstore;
pub mod embedding;
pub mod extract;
pub mod http;
pub mod llm;
pub mod logging;
pub mod migrate;
pub mod opensearch;
pub mod orchestrator;
pub mod retry;
pub mod server;
pub mod worker;

pub use docrag_core::{RagError, Result};
