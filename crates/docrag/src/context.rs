//! Long-lived service state, built once at startup and shared with every
//! handler behind an `Arc`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use sqlx::SqlitePool;
use tracing::info;

use docrag_core::consistency::ConsistencyCoordinator;
use docrag_core::embedding::Embedder;
use docrag_core::ingest::{ImageSupport, IngestionPipeline};
use docrag_core::language::{LanguageDetector, StopwordDetector};
use docrag_core::llm::{ImageCaptioner, LanguageModel};
use docrag_core::retrieve::SmartRetriever;
use docrag_core::store::memory::{InMemoryDocumentStore, InMemoryImageIndex, InMemoryVectorIndex};
use docrag_core::store::{DocumentStore, ImageIndex, VectorIndex};

use crate::config::Config;
use crate::docstore::SqliteDocumentStore;
use crate::embedding::{create_embedder, create_image_embedder};
use crate::http::RetryingClient;
use crate::llm::{OpenAiCaptioner, OpenAiChatClient};
use crate::opensearch::{OpenSearchClient, OpenSearchImageIndex, OpenSearchVectorIndex};
use crate::retry::RetryPolicy;
use crate::worker::{BlockingScorer, IngestQueue};

/// Reachability probe for an upstream dependency.
#[async_trait]
pub trait HealthCheck: Send + Sync {
    async fn check(&self) -> docrag_core::Result<()>;
}

#[async_trait]
impl HealthCheck for OpenAiChatClient {
    async fn check(&self) -> docrag_core::Result<()> {
        self.health().await
    }
}

#[async_trait]
impl HealthCheck for OpenSearchClient {
    async fn check(&self) -> docrag_core::Result<()> {
        self.ping().await
    }
}

/// Explicit collaborators, for tests and embedders of the library.
pub struct AppParts {
    pub docs: Arc<dyn DocumentStore>,
    pub index: Arc<dyn VectorIndex>,
    pub images: Option<ImageSupport>,
    pub llm: Arc<dyn LanguageModel>,
    pub captioner: Option<Arc<dyn ImageCaptioner>>,
    pub language: Arc<dyn LanguageDetector>,
    pub llm_health: Option<Arc<dyn HealthCheck>>,
}

impl AppParts {
    /// In-memory stores over `embedder`, with no image support.
    pub fn in_memory(embedder: Arc<dyn Embedder>, llm: Arc<dyn LanguageModel>) -> Self {
        Self {
            docs: Arc::new(InMemoryDocumentStore::new()),
            index: Arc::new(InMemoryVectorIndex::new(embedder)),
            images: None,
            llm,
            captioner: None,
            language: Arc::new(StopwordDetector),
            llm_health: None,
        }
    }
}

pub struct AppContext {
    pub config: Config,
    pub docs: Arc<dyn DocumentStore>,
    pub coordinator: Arc<ConsistencyCoordinator>,
    pub pipeline: Arc<IngestionPipeline>,
    pub retriever: SmartRetriever,
    pub llm: Arc<dyn LanguageModel>,
    pub captioner: Option<Arc<dyn ImageCaptioner>>,
    pub language: Arc<dyn LanguageDetector>,
    pub queue: IngestQueue,
    llm_health: Option<Arc<dyn HealthCheck>>,
    pool: Option<SqlitePool>,
}

impl AppContext {
    /// Wire every backend named in `config`. Must run inside a tokio runtime.
    pub async fn build(config: Config) -> Result<Self> {
        let mut pool = None;
        let docs: Arc<dyn DocumentStore> = match config.db.provider.as_str() {
            "memory" => Arc::new(InMemoryDocumentStore::new()),
            _ => {
                let p = crate::db::connect(&config)
                    .await
                    .with_context(|| format!("opening {}", config.db.path.display()))?;
                crate::migrate::run_migrations(&p).await?;
                pool = Some(p.clone());
                Arc::new(SqliteDocumentStore::new(p, RetryPolicy::new(config.vector.max_retries)))
            }
        };

        let embedder = create_embedder(&config.embedding)?;
        let image_embedder = create_image_embedder(&config.image_embedding)?;

        let (index, image_index): (Arc<dyn VectorIndex>, Arc<dyn ImageIndex>) =
            match config.vector.provider.as_str() {
                "memory" => (
                    Arc::new(InMemoryVectorIndex::new(embedder.clone())) as Arc<dyn VectorIndex>,
                    Arc::new(InMemoryImageIndex::new()) as Arc<dyn ImageIndex>,
                ),
                _ => {
                    let http = RetryingClient::new(
                        "opensearch",
                        Duration::from_secs(config.vector.timeout_secs),
                        RetryPolicy::new(config.vector.max_retries),
                    )?;
                    let client = OpenSearchClient::new(&config.vector, http);
                    let image_dims = image_embedder.as_ref().map(|e| e.dims()).unwrap_or(0);
                    (
                        Arc::new(OpenSearchVectorIndex::new(client.clone(), embedder.clone()))
                            as Arc<dyn VectorIndex>,
                        Arc::new(OpenSearchImageIndex::new(client, image_dims)) as Arc<dyn ImageIndex>,
                    )
                }
            };
        let images = image_embedder.map(|embedder| ImageSupport {
            index: image_index,
            embedder,
        });

        let chat = Arc::new(OpenAiChatClient::new(&config.llm)?);
        let captioner: Option<Arc<dyn ImageCaptioner>> = if config.captioning.enabled {
            Some(Arc::new(OpenAiCaptioner::new(&config.llm, &config.captioning)?) as Arc<dyn ImageCaptioner>)
        } else {
            None
        };

        info!(
            db = %config.db.provider,
            vector = %config.vector.provider,
            embedding = %config.embedding.provider,
            model = %embedder.model_name(),
            dims = embedder.dims(),
            images = images.is_some(),
            "backends configured"
        );

        let parts = AppParts {
            docs,
            index,
            images,
            llm: chat.clone(),
            captioner,
            language: Arc::new(StopwordDetector),
            llm_health: Some(chat as Arc<dyn HealthCheck>),
        };
        let mut ctx = Self::from_parts(config, parts)?;
        ctx.pool = pool;
        Ok(ctx)
    }

    /// Assemble from explicit parts. Must run inside a tokio runtime.
    pub fn from_parts(config: Config, parts: AppParts) -> Result<Self> {
        let chunker = config.chunking.chunker()?;
        let mut coordinator = ConsistencyCoordinator::new(
            parts.docs.clone(),
            parts.index.clone(),
            config.naming.naming(),
        );
        if let Some(images) = &parts.images {
            coordinator = coordinator.with_image_index(images.index.clone());
        }
        let coordinator = Arc::new(coordinator);

        let mut pipeline = IngestionPipeline::new(
            coordinator.clone(),
            parts.docs.clone(),
            parts.index.clone(),
            chunker,
        );
        if let Some(images) = parts.images {
            pipeline = pipeline.with_images(images);
        }
        let pipeline = Arc::new(pipeline.with_scorer(Arc::new(BlockingScorer)));
        let queue = IngestQueue::start(
            pipeline.clone(),
            config.ingest.workers,
            config.ingest.queue_capacity,
        );

        Ok(Self {
            retriever: SmartRetriever::new(parts.index),
            docs: parts.docs,
            coordinator,
            pipeline,
            llm: parts.llm,
            captioner: parts.captioner,
            language: parts.language,
            queue,
            llm_health: parts.llm_health,
            pool: None,
            config,
        })
    }

    /// Probe the LLM endpoint. `None` when no probe is configured.
    pub async fn llm_health(&self) -> Option<docrag_core::Result<()>> {
        match &self.llm_health {
            Some(probe) => Some(probe.check().await),
            None => None,
        }
    }

    /// Drain background ingestion and close the database.
    pub async fn shutdown(&self) {
        self.queue.shutdown().await;
        if let Some(pool) = &self.pool {
            pool.close().await;
        }
        info!("shutdown complete");
    }
}
