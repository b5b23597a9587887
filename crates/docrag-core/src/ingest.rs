//! Dual-store ingestion and deletion.
//!
//! Each record is processed on its own: a failure is logged with
//! `user`, `filename` and `stage` fields and recorded in that record's
//! [`IngestOutcome`], and the batch moves on.
//!
//! Per record:
//!
//! 1. Ensure the user's collection and indices ([`ConsistencyCoordinator`]).
//! 2. Skip if `doc_name` already exists. A stored row with an empty
//!    summary gets the new summary attached.
//! 3. Score the summary against the content (ROUGE) through the
//!    injected [`SummaryScorer`].
//! 4. Insert the document row. On failure stop here.
//! 5. Chunk and index the content (for images, the caption). Failures are
//!    logged; the document row stays.
//! 6. Images only: embed the image into the per-user image index.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::chunk::Chunker;
use crate::consistency::{CollectionHandles, ConsistencyCoordinator};
use crate::embedding::ImageEmbedder;
use crate::error::{RagError, Result};
use crate::models::{
    ChunkMetadata, DocumentRecord, DocumentUpdate, ImageMetadata, ImageRecord, IngestOutcome,
    IngestRecord, IngestStatus, RecordKind,
};
use crate::naming::{normalize_user_id, sanitize_filename};
use crate::score::{InlineScorer, SummaryScorer};
use crate::store::{DocumentStore, ImageIndex, VectorIndex};

/// Image-side collaborators. Absent when image embedding is disabled.
#[derive(Clone)]
pub struct ImageSupport {
    pub index: Arc<dyn ImageIndex>,
    pub embedder: Arc<dyn ImageEmbedder>,
}

pub struct IngestionPipeline {
    coordinator: Arc<ConsistencyCoordinator>,
    docs: Arc<dyn DocumentStore>,
    index: Arc<dyn VectorIndex>,
    images: Option<ImageSupport>,
    chunker: Chunker,
    scorer: Arc<dyn SummaryScorer>,
}

/// Result of deleting one filename from every projection.
#[derive(Debug, Clone, Serialize)]
pub struct DeletionReport {
    pub user_id: String,
    pub original_filename: String,
    pub normalized_filename: String,
    #[serde(rename = "deleted_from_mongodb")]
    pub deleted_from_document_store: bool,
    #[serde(rename = "deleted_from_opensearch")]
    pub deleted_from_vector_index: bool,
    pub deleted_image_entries: u64,
    pub errors: Option<Vec<String>>,
    pub message: String,
}

impl IngestionPipeline {
    pub fn new(
        coordinator: Arc<ConsistencyCoordinator>,
        docs: Arc<dyn DocumentStore>,
        index: Arc<dyn VectorIndex>,
        chunker: Chunker,
    ) -> Self {
        Self {
            coordinator,
            docs,
            index,
            images: None,
            chunker,
            scorer: Arc::new(InlineScorer),
        }
    }

    pub fn with_images(mut self, images: ImageSupport) -> Self {
        self.images = Some(images);
        self
    }

    pub fn with_scorer(mut self, scorer: Arc<dyn SummaryScorer>) -> Self {
        self.scorer = scorer;
        self
    }

    pub fn coordinator(&self) -> &ConsistencyCoordinator {
        &self.coordinator
    }

    /// Ingest a batch for `user_id`. Never fails as a whole.
    pub async fn ingest(&self, records: &[IngestRecord], user_id: &str) -> Vec<IngestOutcome> {
        let user = normalize_user_id(user_id);
        let mut outcomes = Vec::with_capacity(records.len());
        for record in records {
            outcomes.push(self.ingest_one(record, &user).await);
        }

        let count = |status: IngestStatus| outcomes.iter().filter(|o| o.status == status).count();
        info!(
            user = %user,
            inserted = count(IngestStatus::Inserted),
            skipped = count(IngestStatus::SkippedDuplicate),
            failed = count(IngestStatus::Failed),
            "ingestion batch complete"
        );
        outcomes
    }

    async fn ingest_one(&self, record: &IngestRecord, user: &str) -> IngestOutcome {
        let filename = record.filename.as_str();

        let handles = match self.coordinator.ensure(user).await {
            Ok((handles, _)) => handles,
            Err(e) => {
                error!(user = %user, filename = %filename, stage = "ensure_collection", error = %e, "ingestion failed");
                return IngestOutcome::failed(filename, e);
            }
        };

        match self.docs.find_by_doc_name(&handles.collection, filename).await {
            Ok(Some(existing)) => {
                info!(user = %user, filename = %filename, "document already exists; skipping");
                if existing.record.doc_summary.trim().is_empty() {
                    self.attach_summary(&handles, record).await;
                }
                return IngestOutcome::skipped(filename);
            }
            Ok(None) => {}
            Err(e) => {
                error!(user = %user, filename = %filename, stage = "dedup_lookup", error = %e, "ingestion failed");
                return IngestOutcome::failed(filename, e);
            }
        }

        let summary = record.summary.as_deref().unwrap_or("");
        let rouge_score = self
            .scorer
            .score(&record.content, record.summary.as_deref())
            .await;
        let doc = DocumentRecord {
            doc_name: filename.to_string(),
            doc_content: record.content.clone(),
            doc_summary: summary.to_string(),
            uploaded_at: Utc::now().to_rfc3339(),
            is_image: record.is_image(),
            rouge_score,
            image: match &record.kind {
                RecordKind::Image { metadata, .. } => Some(metadata.clone()),
                RecordKind::Text => None,
            },
        };

        match self.docs.insert(&handles.collection, &doc).await {
            Ok(_) => {}
            Err(RagError::DuplicateDocument(_)) => {
                info!(user = %user, filename = %filename, "document inserted concurrently; skipping");
                return IngestOutcome::skipped(filename);
            }
            Err(e) => {
                error!(user = %user, filename = %filename, stage = "document_insert", error = %e, "ingestion failed");
                return IngestOutcome::failed(filename, e);
            }
        }

        let mut outcome = IngestOutcome::inserted(filename);
        let mut vector_errors = Vec::new();

        if let Err(e) = self.index_text(&handles, filename, &record.content, &doc.uploaded_at).await {
            error!(user = %user, filename = %filename, stage = "vector_index", error = %e, "document stored without vectors");
            vector_errors.push(e.to_string());
        }

        if let RecordKind::Image { bytes, metadata } = &record.kind {
            if let Err(e) = self
                .index_image(&handles, filename, &record.content, bytes, metadata, &doc.uploaded_at)
                .await
            {
                error!(user = %user, filename = %filename, stage = "image_index", error = %e, "image stored without image vector");
                vector_errors.push(e.to_string());
            }
        }

        if !vector_errors.is_empty() {
            outcome.error = Some(vector_errors.join("; "));
        }
        outcome
    }

    async fn attach_summary(&self, handles: &CollectionHandles, record: &IngestRecord) {
        let Some(summary) = record.summary.as_deref().filter(|s| !s.trim().is_empty()) else {
            return;
        };
        let update = DocumentUpdate {
            doc_summary: Some(summary.to_string()),
            rouge_score: Some(self.scorer.score(&record.content, Some(summary)).await),
        };
        match self
            .docs
            .update_fields(&handles.collection, &record.filename, &update)
            .await
        {
            Ok(true) => info!(user = %handles.user_id, filename = %record.filename, "attached summary to existing document"),
            Ok(false) => {}
            Err(e) => warn!(user = %handles.user_id, filename = %record.filename, stage = "attach_summary", error = %e, "could not attach summary"),
        }
    }

    async fn index_text(
        &self,
        handles: &CollectionHandles,
        filename: &str,
        content: &str,
        timestamp: &str,
    ) -> Result<usize> {
        let chunks = self.chunker.chunk(content);
        if chunks.is_empty() {
            warn!(user = %handles.user_id, filename = %filename, "no non-blank chunks to index");
            return Ok(0);
        }
        let total = chunks.len();
        let entries: Vec<(String, ChunkMetadata)> = chunks
            .into_iter()
            .enumerate()
            .map(|(i, text)| {
                (
                    text,
                    ChunkMetadata {
                        doc_name: filename.to_string(),
                        doc_content: content.to_string(),
                        timestamp: timestamp.to_string(),
                        chunk_index: i,
                        total_chunks: total,
                    },
                )
            })
            .collect();
        let written = self.index.add_chunks(&handles.text_index, &entries).await?;
        info!(user = %handles.user_id, filename = %filename, chunks = written, "indexed chunks");
        Ok(written)
    }

    async fn index_image(
        &self,
        handles: &CollectionHandles,
        filename: &str,
        caption: &str,
        bytes: &[u8],
        metadata: &ImageMetadata,
        timestamp: &str,
    ) -> Result<()> {
        let Some(images) = &self.images else {
            return Ok(());
        };
        let image_vector = images
            .embedder
            .embed_image(bytes)
            .await
            .map_err(|e| RagError::index_write(&handles.image_index, e.to_string()))?;
        let record = ImageRecord {
            image_vector,
            image_path: format!("{}/{}", handles.user_id, filename),
            filename: filename.to_string(),
            caption: caption.to_string(),
            metadata: metadata.clone(),
            timestamp: timestamp.to_string(),
            user_id: handles.user_id.clone(),
        };
        images.index.add_image(&handles.image_index, &record).await
    }

    /// Delete `filename` from the document store, the text index and the
    /// image index. Absence everywhere is reported, not an error.
    pub async fn delete(&self, user_id: &str, filename: &str) -> DeletionReport {
        let handles = self.coordinator.names(user_id);
        let normalized = sanitize_filename(filename);
        let mut errors = Vec::new();

        let from_docs = match self
            .docs
            .delete_by_doc_name(&handles.collection, &normalized)
            .await
        {
            Ok(deleted) => deleted,
            Err(e) => {
                errors.push(format!("document store: {}", e));
                false
            }
        };

        let from_index = match self
            .index
            .delete_by_doc_name(&handles.text_index, &normalized)
            .await
        {
            Ok(n) => n > 0,
            Err(e) => {
                errors.push(format!("vector index: {}", e));
                false
            }
        };

        let image_entries = match &self.images {
            Some(images) => match images
                .index
                .delete_by_filename(&handles.image_index, &normalized)
                .await
            {
                Ok(n) => n,
                Err(e) => {
                    errors.push(format!("image index: {}", e));
                    0
                }
            },
            None => 0,
        };

        if from_docs != from_index && errors.is_empty() {
            errors.push(format!(
                "Partial deletion: document store={}, vector index={}",
                from_docs, from_index
            ));
        }

        let message = if !from_docs && !from_index && image_entries == 0 {
            format!(
                "File '{}' was not found for user '{}'. Please check the filename and user_id.",
                normalized, handles.user_id
            )
        } else {
            format!("Successfully deleted '{}' for user '{}'", normalized, handles.user_id)
        };
        info!(
            user = %handles.user_id,
            filename = %normalized,
            from_docs,
            from_index,
            image_entries,
            "delete complete"
        );

        DeletionReport {
            user_id: handles.user_id,
            original_filename: filename.to_string(),
            normalized_filename: normalized,
            deleted_from_document_store: from_docs,
            deleted_from_vector_index: from_index,
            deleted_image_entries: image_entries,
            errors: if errors.is_empty() { None } else { Some(errors) },
            message,
        }
    }
}
