//! Embedding providers behind the core [`Embedder`] and [`ImageEmbedder`]
//! traits.
//!
//! | Config Value | Provider |
//! |-------------|----------|
//! | `"openai"` | [`OpenAiEmbedder`], `POST /v1/embeddings` |
//! | `"ollama"` | [`OllamaEmbedder`], `POST /api/embed` |
//! | `"local"` | `LocalEmbedder` (fastembed, in-process) |
//! | `"hashing"` | [`HashingEmbedder`], deterministic, no model |
//!
//! Remote providers go through [`RetryingClient`], so 429/5xx and network
//! errors are retried with exponential backoff and everything else fails
//! immediately. Local models are loaded once on first use and run on the
//! blocking pool.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result as AnyResult};
use async_trait::async_trait;
use serde_json::{json, Value};

use docrag_core::embedding::{Embedder, HashingEmbedder, ImageEmbedder};
use docrag_core::{RagError, Result};

use crate::config::{EmbeddingConfig, ImageEmbeddingConfig};
use crate::http::RetryingClient;
use crate::retry::RetryPolicy;

const SERVICE: &str = "embedding";

fn http_client(config: &EmbeddingConfig, service: &str) -> AnyResult<RetryingClient> {
    RetryingClient::new(
        service,
        Duration::from_secs(config.timeout_secs),
        RetryPolicy::new(config.max_retries),
    )
}

fn required_model(config: &EmbeddingConfig) -> AnyResult<String> {
    config.model.clone().ok_or_else(|| {
        anyhow::anyhow!("embedding.model required for {} provider", config.provider)
    })
}

fn required_dims(config: &EmbeddingConfig) -> AnyResult<usize> {
    match config.dims {
        Some(d) if d > 0 => Ok(d),
        _ => bail!("embedding.dims required for {} provider", config.provider),
    }
}

fn parse_vector(value: &Value) -> Option<Vec<f32>> {
    value
        .as_array()
        .map(|a| a.iter().map(|v| v.as_f64().unwrap_or(0.0) as f32).collect())
}

fn check_count(expected: usize, got: &[Vec<f32>]) -> Result<()> {
    if got.len() != expected {
        return Err(RagError::backend(
            SERVICE,
            format!("expected {} embeddings, got {}", expected, got.len()),
        ));
    }
    Ok(())
}

// ============ OpenAI ============

pub struct OpenAiEmbedder {
    model: String,
    dims: usize,
    batch_size: usize,
    url: String,
    api_key: String,
    http: RetryingClient,
}

impl OpenAiEmbedder {
    pub fn new(config: &EmbeddingConfig) -> AnyResult<Self> {
        let model = required_model(config)?;
        let dims = required_dims(config)?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let base = config
            .url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com".to_string());
        Ok(Self {
            model,
            dims,
            batch_size: config.batch_size.max(1),
            url: format!("{}/v1/embeddings", base.trim_end_matches('/')),
            api_key,
            http: http_client(config, "openai-embeddings")?,
        })
    }
}

/// Extract `data[].embedding`, ordered by `data[].index`.
pub fn parse_openai_response(json: &Value) -> Result<Vec<Vec<f32>>> {
    let data = json["data"].as_array().ok_or_else(|| {
        RagError::backend(SERVICE, "invalid OpenAI response: missing data array")
    })?;
    let mut indexed = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let vector = parse_vector(&item["embedding"]).ok_or_else(|| {
            RagError::backend(SERVICE, "invalid OpenAI response: missing embedding")
        })?;
        let index = item["index"].as_u64().map(|i| i as usize).unwrap_or(position);
        indexed.push((index, vector));
    }
    indexed.sort_by_key(|(i, _)| *i);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let body = json!({ "model": self.model, "input": batch });
            let response = self
                .http
                .json(|c| c.post(&self.url).bearer_auth(&self.api_key).json(&body))
                .await?;
            let vectors = parse_openai_response(&response)?;
            check_count(batch.len(), &vectors)?;
            out.extend(vectors);
        }
        Ok(out)
    }
}

// ============ Ollama ============

pub struct OllamaEmbedder {
    model: String,
    dims: usize,
    url: String,
    http: RetryingClient,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> AnyResult<Self> {
        let model = required_model(config)?;
        let dims = required_dims(config)?;
        let base = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());
        Ok(Self {
            model,
            dims,
            url: format!("{}/api/embed", base.trim_end_matches('/')),
            http: http_client(config, "ollama")?,
        })
    }
}

pub fn parse_ollama_response(json: &Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = json["embeddings"].as_array().ok_or_else(|| {
        RagError::backend(SERVICE, "invalid Ollama response: missing embeddings array")
    })?;
    embeddings
        .iter()
        .map(|e| {
            parse_vector(e).ok_or_else(|| {
                RagError::backend(SERVICE, "invalid Ollama response: embedding is not an array")
            })
        })
        .collect()
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = json!({ "model": self.model, "input": texts });
        let response = self.http.json(|c| c.post(&self.url).json(&body)).await?;
        let vectors = parse_ollama_response(&response)?;
        check_count(texts.len(), &vectors)?;
        Ok(vectors)
    }
}

// ============ Local (fastembed) ============

/// Model name and dimensionality for the `local` provider.
pub fn resolve_local_model(config: &EmbeddingConfig) -> (String, usize) {
    let model_name = config
        .model
        .clone()
        .unwrap_or_else(|| "all-minilm-l6-v2".to_string());
    let dims = config.dims.unwrap_or(match model_name.as_str() {
        "bge-base-en-v1.5" | "nomic-embed-text-v1" | "nomic-embed-text-v1.5" => 768,
        "multilingual-e5-base" => 768,
        "bge-large-en-v1.5" | "multilingual-e5-large" => 1024,
        _ => 384,
    });
    (model_name, dims)
}

#[cfg(feature = "local-embeddings-fastembed")]
mod local {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    use docrag_core::embedding::{Embedder, ImageEmbedder};
    use docrag_core::{RagError, Result};

    const SERVICE: &str = "local-embedding";

    fn text_model(name: &str) -> anyhow::Result<fastembed::EmbeddingModel> {
        use fastembed::EmbeddingModel::*;
        Ok(match name {
            "all-minilm-l6-v2" => AllMiniLML6V2,
            "bge-small-en-v1.5" => BGESmallENV15,
            "bge-base-en-v1.5" => BGEBaseENV15,
            "bge-large-en-v1.5" => BGELargeENV15,
            "nomic-embed-text-v1" => NomicEmbedTextV1,
            "nomic-embed-text-v1.5" => NomicEmbedTextV15,
            "multilingual-e5-small" => MultilingualE5Small,
            "multilingual-e5-base" => MultilingualE5Base,
            "multilingual-e5-large" => MultilingualE5Large,
            other => anyhow::bail!(
                "Unknown local embedding model: '{}'. Supported models: \
                 all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5, \
                 nomic-embed-text-v1, nomic-embed-text-v1.5, \
                 multilingual-e5-small, multilingual-e5-base, multilingual-e5-large",
                other
            ),
        })
    }

    fn model_error(e: impl std::fmt::Display) -> RagError {
        RagError::backend(SERVICE, e.to_string())
    }

    pub struct LocalEmbedder {
        model_name: String,
        dims: usize,
        batch_size: usize,
        kind: fastembed::EmbeddingModel,
        model: Arc<Mutex<Option<fastembed::TextEmbedding>>>,
    }

    impl LocalEmbedder {
        pub fn new(model_name: String, dims: usize, batch_size: usize) -> anyhow::Result<Self> {
            let kind = text_model(&model_name)?;
            Ok(Self {
                model_name,
                dims,
                batch_size,
                kind,
                model: Arc::new(Mutex::new(None)),
            })
        }
    }

    #[async_trait]
    impl Embedder for LocalEmbedder {
        fn model_name(&self) -> &str {
            &self.model_name
        }

        fn dims(&self) -> usize {
            self.dims
        }

        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            let texts = texts.to_vec();
            let slot = Arc::clone(&self.model);
            let kind = self.kind.clone();
            let batch_size = self.batch_size;
            tokio::task::spawn_blocking(move || {
                let mut guard = slot.lock().unwrap_or_else(|p| p.into_inner());
                if guard.is_none() {
                    tracing::info!(model = ?kind, "loading local embedding model");
                    let model = fastembed::TextEmbedding::try_new(
                        fastembed::InitOptions::new(kind).with_show_download_progress(true),
                    )
                    .map_err(model_error)?;
                    *guard = Some(model);
                }
                let model = guard
                    .as_mut()
                    .ok_or_else(|| model_error("embedding model not loaded"))?;
                model.embed(texts, Some(batch_size)).map_err(model_error)
            })
            .await
            .map_err(model_error)?
        }
    }

    /// CLIP ViT-B/32 image embeddings.
    pub struct LocalImageEmbedder {
        model: Arc<Mutex<Option<fastembed::ImageEmbedding>>>,
    }

    impl LocalImageEmbedder {
        pub fn new() -> Self {
            Self {
                model: Arc::new(Mutex::new(None)),
            }
        }
    }

    #[async_trait]
    impl ImageEmbedder for LocalImageEmbedder {
        fn dims(&self) -> usize {
            512
        }

        async fn embed_image(&self, bytes: &[u8]) -> Result<Vec<f32>> {
            let bytes = bytes.to_vec();
            let slot = Arc::clone(&self.model);
            tokio::task::spawn_blocking(move || {
                let mut guard = slot.lock().unwrap_or_else(|p| p.into_inner());
                if guard.is_none() {
                    tracing::info!("loading local image embedding model");
                    let model = fastembed::ImageEmbedding::try_new(
                        fastembed::ImageInitOptions::new(fastembed::ImageEmbeddingModel::ClipVitB32)
                            .with_show_download_progress(true),
                    )
                    .map_err(model_error)?;
                    *guard = Some(model);
                }
                let model = guard
                    .as_mut()
                    .ok_or_else(|| model_error("image model not loaded"))?;
                let mut vectors = model
                    .embed_bytes(&[bytes.as_slice()], None)
                    .map_err(model_error)?;
                vectors
                    .pop()
                    .ok_or_else(|| model_error("empty image embedding response"))
            })
            .await
            .map_err(model_error)?
        }
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
pub use local::{LocalEmbedder, LocalImageEmbedder};

/// Build the text embedder named by `embedding.provider`.
pub fn create_embedder(config: &EmbeddingConfig) -> AnyResult<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAiEmbedder::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaEmbedder::new(config)?)),
        "hashing" => Ok(Arc::new(HashingEmbedder::new(config.resolved_dims()))),
        #[cfg(feature = "local-embeddings-fastembed")]
        "local" => {
            let (model, dims) = resolve_local_model(config);
            Ok(Arc::new(LocalEmbedder::new(model, dims, config.batch_size)?))
        }
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        "local" => bail!("Local embedding provider requires --features local-embeddings-fastembed"),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

/// Build the image embedder, or `None` when image embeddings are disabled.
pub fn create_image_embedder(
    config: &ImageEmbeddingConfig,
) -> AnyResult<Option<Arc<dyn ImageEmbedder>>> {
    match config.provider.as_str() {
        "disabled" => Ok(None),
        #[cfg(feature = "local-embeddings-fastembed")]
        "local" => Ok(Some(Arc::new(LocalImageEmbedder::new()))),
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        "local" => bail!("Local image embeddings require --features local-embeddings-fastembed"),
        other => bail!("Unknown image_embedding provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openai_response_is_reordered_by_index() {
        let json = json!({
            "data": [
                { "index": 1, "embedding": [0.0, 1.0] },
                { "index": 0, "embedding": [1.0, 0.0] }
            ]
        });
        let vectors = parse_openai_response(&json).unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn malformed_responses_are_backend_errors() {
        assert!(matches!(
            parse_openai_response(&json!({ "object": "list" })),
            Err(RagError::Backend { .. })
        ));
        assert!(matches!(
            parse_ollama_response(&json!({ "embeddings": [1, 2] })),
            Err(RagError::Backend { .. })
        ));
    }

    #[test]
    fn ollama_response_parses() {
        let json = json!({ "embeddings": [[0.5, 0.5], [1.0, 0.0]] });
        assert_eq!(parse_ollama_response(&json).unwrap().len(), 2);
    }

    #[test]
    fn local_model_dims_fall_back_by_name() {
        let mut config = EmbeddingConfig::default();
        assert_eq!(resolve_local_model(&config), ("all-minilm-l6-v2".to_string(), 384));
        config.model = Some("bge-base-en-v1.5".into());
        assert_eq!(resolve_local_model(&config).1, 768);
        config.dims = Some(100);
        assert_eq!(resolve_local_model(&config).1, 100);
    }

    #[tokio::test]
    async fn hashing_provider_needs_no_model() {
        let config = EmbeddingConfig {
            provider: "hashing".into(),
            ..EmbeddingConfig::default()
        };
        let embedder = create_embedder(&config).unwrap();
        assert_eq!(embedder.dims(), 384);
        let v = embedder.embed_one("hello world").await.unwrap();
        assert_eq!(v.len(), 384);
    }

    #[test]
    fn unknown_and_disabled_providers() {
        let config = EmbeddingConfig {
            provider: "word2vec".into(),
            ..EmbeddingConfig::default()
        };
        assert!(create_embedder(&config).is_err());
        assert!(create_image_embedder(&ImageEmbeddingConfig::default())
            .unwrap()
            .is_none());
    }
}
