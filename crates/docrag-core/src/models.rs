//! Core data models that flow through ingestion and retrieval.
//!
//! Records are explicit structs validated at the ingestion boundary:
//! [`DocumentRecord`] is one row in a user's document collection,
//! [`ChunkMetadata`] travels with every chunk in the text vector index and
//! [`ImageRecord`] is one entry in the per-user image index.

use serde::{Deserialize, Serialize};

/// ROUGE F-measures between a document's content and its summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RougeScores {
    pub rouge1: f64,
    pub rouge2: f64,
    #[serde(rename = "rougeL")]
    pub rouge_l: f64,
}

/// Dimensions and encoding of an uploaded image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageMetadata {
    pub width: u32,
    pub height: u32,
    pub format: String,
    pub size_bytes: u64,
}

/// One row in a user's document collection.
///
/// `doc_name` is the unique key within the collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub doc_name: String,
    /// Full extracted text, or the caption for images.
    pub doc_content: String,
    pub doc_summary: String,
    /// RFC 3339 timestamp.
    pub uploaded_at: String,
    pub is_image: bool,
    pub rouge_score: RougeScores,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageMetadata>,
}

/// A [`DocumentRecord`] as stored, with its backend-assigned ID.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredDocument {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(flatten)]
    pub record: DocumentRecord,
}

/// Fields that may be attached to an existing record after the fact.
#[derive(Debug, Clone, Default)]
pub struct DocumentUpdate {
    pub doc_summary: Option<String>,
    pub rouge_score: Option<RougeScores>,
}

impl DocumentUpdate {
    pub fn is_empty(&self) -> bool {
        self.doc_summary.is_none() && self.rouge_score.is_none()
    }
}

/// Metadata stored alongside each chunk in the text vector index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub doc_name: String,
    /// Full document text, denormalized onto every chunk.
    pub doc_content: String,
    pub timestamp: String,
    pub chunk_index: usize,
    pub total_chunks: usize,
}

/// One entry in the per-user image index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub image_vector: Vec<f32>,
    pub image_path: String,
    pub filename: String,
    pub caption: String,
    pub metadata: ImageMetadata,
    pub timestamp: String,
    pub user_id: String,
}

/// A chunk returned from similarity search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub text: String,
    pub metadata: ChunkMetadata,
    pub score: f32,
}

/// Kind-specific payload of an ingestion record.
#[derive(Debug, Clone)]
pub enum RecordKind {
    Text,
    Image {
        bytes: Vec<u8>,
        metadata: ImageMetadata,
    },
}

/// A document handed to the ingestion pipeline once summarization is done.
#[derive(Debug, Clone)]
pub struct IngestRecord {
    /// Normalized storage key.
    pub filename: String,
    /// Extracted text, or the caption for images.
    pub content: String,
    pub summary: Option<String>,
    pub kind: RecordKind,
}

impl IngestRecord {
    pub fn text(filename: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            content: content.into(),
            summary: None,
            kind: RecordKind::Text,
        }
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    pub fn is_image(&self) -> bool {
        matches!(self.kind, RecordKind::Image { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStatus {
    Inserted,
    SkippedDuplicate,
    Failed,
}

/// Per-record result of an ingestion batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestOutcome {
    pub filename: String,
    pub status: IngestStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl IngestOutcome {
    pub fn inserted(filename: &str) -> Self {
        Self {
            filename: filename.to_string(),
            status: IngestStatus::Inserted,
            error: None,
        }
    }

    pub fn skipped(filename: &str) -> Self {
        Self {
            filename: filename.to_string(),
            status: IngestStatus::SkippedDuplicate,
            error: None,
        }
    }

    pub fn failed(filename: &str, error: impl ToString) -> Self {
        Self {
            filename: filename.to_string(),
            status: IngestStatus::Failed,
            error: Some(error.to_string()),
        }
    }
}
