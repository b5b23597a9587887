//! In-memory gateway implementations for tests and offline runs.
//!
//! Uses `HashMap` and `Vec` behind `std::sync::RwLock`. Vector search is
//! brute-force cosine similarity over every chunk in the index. Locks are
//! never held across an `.await`: embeddings are computed first.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use crate::embedding::{cosine_similarity, Embedder};
use crate::error::{RagError, Result};
use crate::models::{
    ChunkMetadata, DocumentRecord, DocumentUpdate, ImageRecord, SearchHit, StoredDocument,
};

use super::{DocumentStore, ImageIndex, VectorIndex};

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// In-memory document store. Inserting into a missing collection creates it.
#[derive(Default)]
pub struct InMemoryDocumentStore {
    collections: RwLock<HashMap<String, Vec<StoredDocument>>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn collection_exists(&self, collection: &str) -> Result<bool> {
        Ok(read(&self.collections).contains_key(collection))
    }

    async fn get_or_create_collection(&self, collection: &str) -> Result<()> {
        write(&self.collections)
            .entry(collection.to_string())
            .or_default();
        Ok(())
    }

    async fn find_by_doc_name(
        &self,
        collection: &str,
        doc_name: &str,
    ) -> Result<Option<StoredDocument>> {
        Ok(read(&self.collections)
            .get(collection)
            .and_then(|docs| docs.iter().find(|d| d.record.doc_name == doc_name))
            .cloned())
    }

    async fn insert(&self, collection: &str, record: &DocumentRecord) -> Result<String> {
        let mut collections = write(&self.collections);
        let docs = collections.entry(collection.to_string()).or_default();
        if docs.iter().any(|d| d.record.doc_name == record.doc_name) {
            return Err(RagError::DuplicateDocument(record.doc_name.clone()));
        }
        let id = uuid::Uuid::new_v4().to_string();
        docs.push(StoredDocument {
            id: id.clone(),
            record: record.clone(),
        });
        Ok(id)
    }

    async fn update_fields(
        &self,
        collection: &str,
        doc_name: &str,
        update: &DocumentUpdate,
    ) -> Result<bool> {
        let mut collections = write(&self.collections);
        let Some(doc) = collections
            .get_mut(collection)
            .and_then(|docs| docs.iter_mut().find(|d| d.record.doc_name == doc_name))
        else {
            return Ok(false);
        };
        if let Some(summary) = &update.doc_summary {
            doc.record.doc_summary = summary.clone();
        }
        if let Some(score) = update.rouge_score {
            doc.record.rouge_score = score;
        }
        Ok(true)
    }

    async fn delete_by_doc_name(&self, collection: &str, doc_name: &str) -> Result<bool> {
        let mut collections = write(&self.collections);
        let Some(docs) = collections.get_mut(collection) else {
            return Ok(false);
        };
        let before = docs.len();
        docs.retain(|d| d.record.doc_name != doc_name);
        Ok(docs.len() < before)
    }

    async fn list_all(&self, collection: &str) -> Result<Vec<StoredDocument>> {
        Ok(read(&self.collections)
            .get(collection)
            .cloned()
            .unwrap_or_default())
    }
}

struct StoredChunk {
    text: String,
    metadata: ChunkMetadata,
    vector: Vec<f32>,
}

/// In-memory text vector index backed by an [`Embedder`].
pub struct InMemoryVectorIndex {
    embedder: Arc<dyn Embedder>,
    indices: RwLock<HashMap<String, Vec<StoredChunk>>>,
}

impl InMemoryVectorIndex {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            indices: RwLock::new(HashMap::new()),
        }
    }

    /// Number of chunks stored under `doc_name` (test helper).
    pub fn chunk_count(&self, index: &str, doc_name: &str) -> usize {
        read(&self.indices)
            .get(index)
            .map(|chunks| {
                chunks
                    .iter()
                    .filter(|c| c.metadata.doc_name == doc_name)
                    .count()
            })
            .unwrap_or(0)
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn ensure_index(&self, index: &str, drop_existing: bool) -> Result<()> {
        let mut indices = write(&self.indices);
        if drop_existing {
            indices.remove(index);
        }
        indices.entry(index.to_string()).or_default();
        Ok(())
    }

    async fn index_exists(&self, index: &str) -> Result<bool> {
        Ok(read(&self.indices).contains_key(index))
    }

    async fn add_chunks(&self, index: &str, chunks: &[(String, ChunkMetadata)]) -> Result<usize> {
        if chunks.is_empty() {
            return Ok(0);
        }
        let texts: Vec<String> = chunks.iter().map(|(t, _)| t.clone()).collect();
        let vectors = self
            .embedder
            .embed(&texts)
            .await
            .map_err(|e| RagError::index_write(index, e.to_string()))?;
        if vectors.len() != chunks.len() {
            return Err(RagError::index_write(
                index,
                format!("expected {} vectors, got {}", chunks.len(), vectors.len()),
            ));
        }

        let mut indices = write(&self.indices);
        let stored = indices
            .get_mut(index)
            .ok_or_else(|| RagError::index_write(index, "index does not exist"))?;
        for ((text, metadata), vector) in chunks.iter().zip(vectors) {
            stored.push(StoredChunk {
                text: text.clone(),
                metadata: metadata.clone(),
                vector,
            });
        }
        Ok(chunks.len())
    }

    async fn similarity_search(
        &self,
        index: &str,
        query: &str,
        k: usize,
        filter: Option<&[String]>,
        score_threshold: Option<f32>,
    ) -> Result<Vec<SearchHit>> {
        let query_vec = self.embedder.embed_one(query).await?;
        let indices = read(&self.indices);
        let chunks = indices
            .get(index)
            .ok_or_else(|| RagError::backend("vector index", format!("no such index: {}", index)))?;

        let mut hits: Vec<SearchHit> = chunks
            .iter()
            .filter(|c| filter.map_or(true, |names| names.contains(&c.metadata.doc_name)))
            .map(|c| SearchHit {
                text: c.text.clone(),
                metadata: c.metadata.clone(),
                score: cosine_similarity(&query_vec, &c.vector),
            })
            .filter(|h| score_threshold.map_or(true, |min| h.score >= min))
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(k);
        Ok(hits)
    }

    async fn has_doc(&self, index: &str, doc_name: &str) -> Result<bool> {
        Ok(self.chunk_count(index, doc_name) > 0)
    }

    async fn delete_by_doc_name(&self, index: &str, doc_name: &str) -> Result<u64> {
        let mut indices = write(&self.indices);
        let Some(chunks) = indices.get_mut(index) else {
            return Ok(0);
        };
        let before = chunks.len();
        chunks.retain(|c| c.metadata.doc_name != doc_name);
        Ok((before - chunks.len()) as u64)
    }
}

/// In-memory image index.
#[derive(Default)]
pub struct InMemoryImageIndex {
    indices: RwLock<HashMap<String, Vec<ImageRecord>>>,
}

impl InMemoryImageIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self, index: &str) -> Vec<ImageRecord> {
        read(&self.indices).get(index).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl ImageIndex for InMemoryImageIndex {
    async fn ensure_index(&self, index: &str) -> Result<()> {
        write(&self.indices).entry(index.to_string()).or_default();
        Ok(())
    }

    async fn index_exists(&self, index: &str) -> Result<bool> {
        Ok(read(&self.indices).contains_key(index))
    }

    async fn add_image(&self, index: &str, record: &ImageRecord) -> Result<()> {
        write(&self.indices)
            .entry(index.to_string())
            .or_default()
            .push(record.clone());
        Ok(())
    }

    async fn delete_by_filename(&self, index: &str, filename: &str) -> Result<u64> {
        let mut indices = write(&self.indices);
        let Some(records) = indices.get_mut(index) else {
            return Ok(0);
        };
        let before = records.len();
        records.retain(|r| r.filename != filename);
        Ok((before - records.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingEmbedder;
    use crate::models::RougeScores;

    fn record(name: &str) -> DocumentRecord {
        DocumentRecord {
            doc_name: name.to_string(),
            doc_content: "content".to_string(),
            doc_summary: String::new(),
            uploaded_at: "2026-01-01T00:00:00Z".to_string(),
            is_image: false,
            rouge_score: RougeScores::default(),
            image: None,
        }
    }

    fn meta(doc: &str, i: usize) -> ChunkMetadata {
        ChunkMetadata {
            doc_name: doc.to_string(),
            doc_content: String::new(),
            timestamp: "2026-01-01T00:00:00Z".to_string(),
            chunk_index: i,
            total_chunks: 2,
        }
    }

    #[tokio::test]
    async fn document_store_rejects_duplicates() {
        let store = InMemoryDocumentStore::new();
        store.get_or_create_collection("user_a").await.unwrap();
        store.insert("user_a", &record("a.pdf")).await.unwrap();
        let err = store.insert("user_a", &record("a.pdf")).await.unwrap_err();
        assert!(matches!(err, RagError::DuplicateDocument(_)));
        assert_eq!(store.list_all("user_a").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn document_store_update_and_delete() {
        let store = InMemoryDocumentStore::new();
        store.insert("user_a", &record("a.pdf")).await.unwrap();
        let update = DocumentUpdate {
            doc_summary: Some("short".into()),
            rouge_score: None,
        };
        assert!(store.update_fields("user_a", "a.pdf", &update).await.unwrap());
        assert!(!store.update_fields("user_a", "b.pdf", &update).await.unwrap());
        let doc = store.find_by_doc_name("user_a", "a.pdf").await.unwrap().unwrap();
        assert_eq!(doc.record.doc_summary, "short");

        assert!(store.delete_by_doc_name("user_a", "a.pdf").await.unwrap());
        assert!(!store.delete_by_doc_name("user_a", "a.pdf").await.unwrap());
        assert!(!store.delete_by_doc_name("user_missing", "a.pdf").await.unwrap());
    }

    #[tokio::test]
    async fn vector_search_filters_and_ranks() {
        let index = InMemoryVectorIndex::new(Arc::new(HashingEmbedder::new(128)));
        index.ensure_index("user_a", false).await.unwrap();
        index
            .add_chunks(
                "user_a",
                &[
                    ("budget forecast numbers".to_string(), meta("a.pdf", 0)),
                    ("holiday schedule".to_string(), meta("b.pdf", 0)),
                ],
            )
            .await
            .unwrap();

        let hits = index
            .similarity_search("user_a", "budget forecast", 5, None, None)
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].metadata.doc_name, "a.pdf");

        let filter = vec!["b.pdf".to_string()];
        let hits = index
            .similarity_search("user_a", "budget forecast", 5, Some(&filter), None)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].metadata.doc_name, "b.pdf");

        assert!(index.has_doc("user_a", "a.pdf").await.unwrap());
        assert!(!index.has_doc("user_a", "ghost.pdf").await.unwrap());
    }

    #[tokio::test]
    async fn vector_delete_counts_and_drop_recreates() {
        let index = InMemoryVectorIndex::new(Arc::new(HashingEmbedder::new(32)));
        index.ensure_index("user_a", false).await.unwrap();
        index
            .add_chunks(
                "user_a",
                &[
                    ("one".to_string(), meta("a.pdf", 0)),
                    ("two".to_string(), meta("a.pdf", 1)),
                ],
            )
            .await
            .unwrap();
        assert_eq!(index.delete_by_doc_name("user_a", "a.pdf").await.unwrap(), 2);
        assert_eq!(index.delete_by_doc_name("user_a", "a.pdf").await.unwrap(), 0);
        assert_eq!(index.delete_by_doc_name("nope", "a.pdf").await.unwrap(), 0);

        index
            .add_chunks("user_a", &[("three".to_string(), meta("c.pdf", 0))])
            .await
            .unwrap();
        index.ensure_index("user_a", true).await.unwrap();
        assert_eq!(index.chunk_count("user_a", "c.pdf"), 0);
        assert!(index.index_exists("user_a").await.unwrap());
    }

    #[tokio::test]
    async fn writing_to_missing_index_is_index_write_error() {
        let index = InMemoryVectorIndex::new(Arc::new(HashingEmbedder::new(32)));
        let err = index
            .add_chunks("missing", &[("x".to_string(), meta("a.pdf", 0))])
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::IndexWrite { .. }));
    }
}
