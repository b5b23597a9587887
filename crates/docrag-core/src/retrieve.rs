//! Similarity retrieval with fallback for missing documents.
//!
//! When the caller restricts a query to named documents, each name is
//! probed first. If none exist the search widens to the whole collection
//! so the RAG pipeline still gets context; if some exist the filter is
//! narrowed to exactly those.
//!
//! # Pipeline
//!
//! ```text
//! index_exists? ──no──▶ []
//!      │
//!  probe names ──▶ existing / missing
//!      │
//!  similarity_search(k, filter?, threshold?)
//!      │
//!  dedup by normalized-text hash ──▶ truncate(k)
//! ```

use std::collections::HashSet;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tracing::{error, info, warn};

use crate::error::{RagError, Result};
use crate::models::SearchHit;
use crate::store::VectorIndex;

#[derive(Debug, Clone)]
pub struct RetrieveRequest<'a> {
    pub query: &'a str,
    /// Vector index name (already derived from the user id).
    pub collection: &'a str,
    /// Sanitized document names; empty means unrestricted.
    pub requested_doc_names: &'a [String],
    pub k: i64,
    /// Passed through to the index unvalidated.
    pub score_threshold: Option<f32>,
}

/// How the search was scoped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetrievalScope {
    /// The index does not exist; nothing was searched.
    MissingIndex,
    /// No restriction was requested.
    Unrestricted,
    /// Restricted to the requested names that exist.
    Filtered {
        existing: Vec<String>,
        missing: Vec<String>,
    },
    /// None of the requested names exist; searched the whole collection.
    Fallback { missing: Vec<String> },
}

#[derive(Debug, Clone)]
pub struct Retrieval {
    pub hits: Vec<SearchHit>,
    pub scope: RetrievalScope,
}

impl Retrieval {
    pub fn texts(&self) -> Vec<&str> {
        self.hits.iter().map(|h| h.text.as_str()).collect()
    }
}

pub struct SmartRetriever {
    index: Arc<dyn VectorIndex>,
}

impl SmartRetriever {
    pub fn new(index: Arc<dyn VectorIndex>) -> Self {
        Self { index }
    }

    pub async fn retrieve(&self, req: RetrieveRequest<'_>) -> Result<Retrieval> {
        if req.k <= 0 {
            return Err(RagError::InvalidArgument(format!(
                "k must be positive, got {}",
                req.k
            )));
        }
        let k = req.k as usize;

        if !self.index.index_exists(req.collection).await? {
            error!(index = %req.collection, "vector index does not exist; returning no context");
            return Ok(Retrieval {
                hits: Vec::new(),
                scope: RetrievalScope::MissingIndex,
            });
        }

        let (filter, scope) = if req.requested_doc_names.is_empty() {
            (None, RetrievalScope::Unrestricted)
        } else {
            let (existing, missing) = self
                .partition_existing(req.collection, req.requested_doc_names)
                .await;
            if existing.is_empty() {
                info!(
                    index = %req.collection,
                    requested = ?req.requested_doc_names,
                    "none of the requested documents exist; falling back to whole collection"
                );
                (None, RetrievalScope::Fallback { missing })
            } else {
                if !missing.is_empty() {
                    info!(index = %req.collection, ?missing, "ignoring requested documents that do not exist");
                }
                (
                    Some(existing.clone()),
                    RetrievalScope::Filtered { existing, missing },
                )
            }
        };

        let hits = self
            .index
            .similarity_search(
                req.collection,
                req.query,
                k,
                filter.as_deref(),
                req.score_threshold,
            )
            .await?;

        let mut hits = dedup_hits(hits);
        hits.truncate(k);
        Ok(Retrieval { hits, scope })
    }

    async fn partition_existing(&self, index: &str, names: &[String]) -> (Vec<String>, Vec<String>) {
        let mut existing = Vec::new();
        let mut missing = Vec::new();
        for name in names {
            if existing.contains(name) || missing.contains(name) {
                continue;
            }
            match self.index.has_doc(index, name).await {
                Ok(true) => existing.push(name.clone()),
                Ok(false) => missing.push(name.clone()),
                Err(e) => {
                    warn!(index = %index, doc_name = %name, error = %e, "existence probe failed; treating as missing");
                    missing.push(name.clone());
                }
            }
        }
        (existing, missing)
    }
}

fn content_key(text: &str) -> Vec<u8> {
    let normalized = text
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    Sha256::digest(normalized.as_bytes()).to_vec()
}

/// Drop hits whose normalized text was already seen, keeping first-seen order.
pub fn dedup_hits(hits: Vec<SearchHit>) -> Vec<SearchHit> {
    let mut seen = HashSet::new();
    hits.into_iter()
        .filter(|h| seen.insert(content_key(&h.text)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingEmbedder;
    use crate::models::ChunkMetadata;
    use crate::store::memory::InMemoryVectorIndex;

    fn meta(doc: &str) -> ChunkMetadata {
        ChunkMetadata {
            doc_name: doc.to_string(),
            doc_content: String::new(),
            timestamp: "2026-01-01T00:00:00Z".to_string(),
            chunk_index: 0,
            total_chunks: 1,
        }
    }

    async fn seeded() -> SmartRetriever {
        let index = Arc::new(InMemoryVectorIndex::new(Arc::new(HashingEmbedder::new(128))));
        index.ensure_index("user_alice", false).await.unwrap();
        index
            .add_chunks(
                "user_alice",
                &[
                    ("Quarterly budget forecast".to_string(), meta("real.pdf")),
                    ("Budget appendix tables".to_string(), meta("real.pdf")),
                    ("Team offsite budget".to_string(), meta("other.pdf")),
                ],
            )
            .await
            .unwrap();
        SmartRetriever::new(index)
    }

    fn req<'a>(names: &'a [String], k: i64) -> RetrieveRequest<'a> {
        RetrieveRequest {
            query: "budget",
            collection: "user_alice",
            requested_doc_names: names,
            k,
            score_threshold: None,
        }
    }

    #[tokio::test]
    async fn non_positive_k_is_rejected() {
        let r = seeded().await;
        let err = r.retrieve(req(&[], 0)).await.unwrap_err();
        assert!(matches!(err, RagError::InvalidArgument(_)));
        assert!(r.retrieve(req(&[], -3)).await.is_err());
    }

    #[tokio::test]
    async fn missing_index_returns_empty() {
        let r = seeded().await;
        let out = r
            .retrieve(RetrieveRequest {
                collection: "user_nobody",
                ..req(&[], 3)
            })
            .await
            .unwrap();
        assert!(out.hits.is_empty());
        assert_eq!(out.scope, RetrievalScope::MissingIndex);
    }

    #[tokio::test]
    async fn ghost_document_falls_back_to_whole_collection() {
        let r = seeded().await;
        let names = vec!["ghost.pdf".to_string()];
        let out = r.retrieve(req(&names, 3)).await.unwrap();
        assert_eq!(out.hits.len(), 3);
        assert_eq!(
            out.scope,
            RetrievalScope::Fallback {
                missing: vec!["ghost.pdf".to_string()]
            }
        );
    }

    #[tokio::test]
    async fn partial_match_filters_to_existing() {
        let r = seeded().await;
        let names = vec!["real.pdf".to_string(), "ghost.pdf".to_string()];
        let out = r.retrieve(req(&names, 5)).await.unwrap();
        assert_eq!(out.hits.len(), 2);
        assert!(out.hits.iter().all(|h| h.metadata.doc_name == "real.pdf"));
        assert_eq!(
            out.scope,
            RetrievalScope::Filtered {
                existing: vec!["real.pdf".to_string()],
                missing: vec!["ghost.pdf".to_string()],
            }
        );
    }

    #[tokio::test]
    async fn results_are_capped_at_k() {
        let r = seeded().await;
        let out = r.retrieve(req(&[], 1)).await.unwrap();
        assert_eq!(out.hits.len(), 1);
        assert_eq!(out.scope, RetrievalScope::Unrestricted);
    }

    #[test]
    fn dedup_collapses_case_and_whitespace() {
        let hit = |text: &str, score: f32| SearchHit {
            text: text.to_string(),
            metadata: meta("a.pdf"),
            score,
        };
        let out = dedup_hits(vec![
            hit("Alpha  Beta", 0.9),
            hit("  alpha beta\n", 0.8),
            hit("Gamma", 0.7),
        ]);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].text, "Alpha  Beta");
        assert_eq!(out[1].text, "Gamma");
    }
}
