//! # docrag core
//!
//! Runtime-agnostic logic for the docrag ingestion and retrieval backend:
//! data models, chunking, name normalization, scoring, prompt building,
//! gateway traits with in-memory implementations, and the three
//! coordination components that sit on top of them:
//!
//! - [`consistency::ConsistencyCoordinator`] keeps a user's document
//!   collection and vector index aligned.
//! - [`retrieve::SmartRetriever`] runs similarity search with a
//!   fallback policy for missing documents.
//! - [`ingest::IngestionPipeline`] deduplicates, scores and writes each
//!   record to both stores with per-record isolation.
//!
//! This crate contains no tokio, sqlx or network dependencies. Concrete
//! backends (SQLite, OpenSearch, remote embedders and LLMs) live in the
//! `docrag` app crate.

pub mod chunk;
pub mod consistency;
pub mod embedding;
pub mod error;
pub mod ingest;
pub mod language;
pub mod llm;
pub mod models;
pub mod naming;
pub mod prompt;
pub mod retrieve;
pub mod score;
pub mod store;

pub use error::{RagError, Result};
