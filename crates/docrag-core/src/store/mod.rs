//! Gateway traits for the two independently failing stores.
//!
//! - [`DocumentStore`]: one whole-document row per `doc_name` in a
//!   per-user collection.
//! - [`VectorIndex`]: chunk embeddings with [`ChunkMetadata`], searched by
//!   similarity.
//! - [`ImageIndex`]: the separate per-user image vector index.
//!
//! There are no cross-store transactions. Callers write to each store
//! with independent calls and reconcile existence through
//! [`ConsistencyCoordinator`](crate::consistency::ConsistencyCoordinator).
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{ChunkMetadata, DocumentRecord, DocumentUpdate, ImageRecord, SearchHit, StoredDocument};

/// Abstract document database.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`collection_exists`](DocumentStore::collection_exists) | Existence check |
/// | [`get_or_create_collection`](DocumentStore::get_or_create_collection) | Idempotent create |
/// | [`find_by_doc_name`](DocumentStore::find_by_doc_name) | Dedup lookup |
/// | [`insert`](DocumentStore::insert) | Insert a new row |
/// | [`update_fields`](DocumentStore::update_fields) | Attach summary/score |
/// | [`delete_by_doc_name`](DocumentStore::delete_by_doc_name) | Remove one row |
/// | [`list_all`](DocumentStore::list_all) | All rows in a collection |
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn collection_exists(&self, collection: &str) -> Result<bool>;

    /// Create the collection if missing. Racing creators must both succeed.
    async fn get_or_create_collection(&self, collection: &str) -> Result<()>;

    async fn find_by_doc_name(
        &self,
        collection: &str,
        doc_name: &str,
    ) -> Result<Option<StoredDocument>>;

    /// Insert a record and return its ID.
    ///
    /// Fails with [`RagError::DuplicateDocument`](crate::error::RagError::DuplicateDocument)
    /// if `doc_name` is already taken.
    async fn insert(&self, collection: &str, record: &DocumentRecord) -> Result<String>;

    /// Apply `update` to the row named `doc_name`. Returns whether a row matched.
    async fn update_fields(
        &self,
        collection: &str,
        doc_name: &str,
        update: &DocumentUpdate,
    ) -> Result<bool>;

    async fn delete_by_doc_name(&self, collection: &str, doc_name: &str) -> Result<bool>;

    async fn list_all(&self, collection: &str) -> Result<Vec<StoredDocument>>;
}

/// Abstract vector search engine for text chunks.
///
/// Implementations own their embedder: `add_chunks` and
/// `similarity_search` take text and embed it internally.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Idempotent create. With `drop_existing`, destroy and recreate.
    async fn ensure_index(&self, index: &str, drop_existing: bool) -> Result<()>;

    async fn index_exists(&self, index: &str) -> Result<bool>;

    /// Embed and append chunks. Returns the number written.
    ///
    /// Any embedding or write failure surfaces as
    /// [`RagError::IndexWrite`](crate::error::RagError::IndexWrite).
    async fn add_chunks(&self, index: &str, chunks: &[(String, ChunkMetadata)]) -> Result<usize>;

    /// At most `k` hits by descending similarity.
    ///
    /// `filter` restricts hits to chunks whose `doc_name` is in the set.
    /// Hits scoring below `score_threshold` are dropped.
    async fn similarity_search(
        &self,
        index: &str,
        query: &str,
        k: usize,
        filter: Option<&[String]>,
        score_threshold: Option<f32>,
    ) -> Result<Vec<SearchHit>>;

    /// Existence probe: does any chunk carry this `doc_name`?
    async fn has_doc(&self, index: &str, doc_name: &str) -> Result<bool> {
        let filter = [doc_name.to_string()];
        let hits = self
            .similarity_search(index, doc_name, 1, Some(&filter), None)
            .await?;
        Ok(!hits.is_empty())
    }

    /// Remove every chunk whose `doc_name` matches. Zero is not an error.
    async fn delete_by_doc_name(&self, index: &str, doc_name: &str) -> Result<u64>;
}

/// Abstract per-user image vector index.
#[async_trait]
pub trait ImageIndex: Send + Sync {
    async fn ensure_index(&self, index: &str) -> Result<()>;

    async fn index_exists(&self, index: &str) -> Result<bool>;

    async fn add_image(&self, index: &str, record: &ImageRecord) -> Result<()>;

    async fn delete_by_filename(&self, index: &str, filename: &str) -> Result<u64>;
}
