//! Embedding traits and vector utilities.
//!
//! [`Embedder`] turns text into vectors, [`ImageEmbedder`] turns raw image
//! bytes into vectors. Remote and local implementations (OpenAI, Ollama,
//! fastembed) live in the `docrag` app crate; this module ships the
//! deterministic [`HashingEmbedder`] used for tests and offline runs.

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::error::Result;

/// Text embedding backend.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
    /// Vector dimensionality.
    fn dims(&self) -> usize;
    /// Embed a batch of texts. Output order matches input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let mut out = self.embed(&[text.to_string()]).await?;
        out.pop().ok_or_else(|| {
            crate::error::RagError::backend(self.model_name(), "embedder returned no vector")
        })
    }
}

/// Image embedding backend.
#[async_trait]
pub trait ImageEmbedder: Send + Sync {
    fn dims(&self) -> usize;
    async fn embed_image(&self, bytes: &[u8]) -> Result<Vec<f32>>;
}

/// Compute cosine similarity between two vectors.
///
/// Returns `0.0` for empty vectors or vectors of different lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

/// Feature-hashing bag-of-words embedder.
///
/// Each lower-cased alphanumeric token is hashed into one of `dims`
/// buckets with a hash-derived sign; the result is L2-normalized. Texts
/// sharing vocabulary get positive cosine similarity, so it is usable as
/// a dependency-free stand-in for a real model.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dims: usize,
}

impl HashingEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(1) }
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let digest = Sha256::digest(token.to_lowercase().as_bytes());
            let mut idx_bytes = [0u8; 8];
            idx_bytes.copy_from_slice(&digest[..8]);
            let bucket = (u64::from_le_bytes(idx_bytes) % self.dims as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            v[bucket] += sign;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for x in &mut v {
                *x /= norm;
            }
        }
        v
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn model_name(&self) -> &str {
        "hashing"
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}

#[async_trait]
impl ImageEmbedder for HashingEmbedder {
    fn dims(&self) -> usize {
        self.dims
    }

    /// Hashes byte 4-grams. Only useful for wiring tests.
    async fn embed_image(&self, bytes: &[u8]) -> Result<Vec<f32>> {
        let mut v = vec![0.0f32; self.dims];
        for gram in bytes.chunks(4) {
            let digest = Sha256::digest(gram);
            v[digest[0] as usize % self.dims] += 1.0;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            v.iter_mut().for_each(|x| *x /= norm);
        }
        Ok(v)
    }
}
