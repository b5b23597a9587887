//! TOML configuration.
//!
//! Every section except `[db]` is optional and falls back to the defaults
//! below. [`load_config`] parses and validates; a bad chunking setup is
//! fatal at startup.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use docrag_core::chunk::{ChunkMode, Chunker};
use docrag_core::naming::CollectionNaming;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub vector: VectorConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub image_embedding: ImageEmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub captioning: CaptioningConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub naming: NamingConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    #[serde(default = "default_db_provider")]
    pub provider: String,
    pub path: PathBuf,
}

fn default_db_provider() -> String {
    "sqlite".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Upper bound on a single multipart upload body.
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}
fn default_max_upload_bytes() -> usize {
    64 * 1024 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct VectorConfig {
    #[serde(default = "default_vector_provider")]
    pub provider: String,
    #[serde(default = "default_opensearch_url")]
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
    /// Name of the environment variable holding the password.
    #[serde(default = "default_password_env")]
    pub password_env: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_store_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            provider: default_vector_provider(),
            url: default_opensearch_url(),
            username: None,
            password_env: default_password_env(),
            max_retries: default_max_retries(),
            timeout_secs: default_store_timeout_secs(),
        }
    }
}

fn default_vector_provider() -> String {
    "opensearch".to_string()
}
fn default_opensearch_url() -> String {
    "http://localhost:9200".to_string()
}
fn default_password_env() -> String {
    "OPENSEARCH_PASSWORD".to_string()
}
fn default_store_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for the `ollama` provider.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_store_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_store_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    /// Vector dimensionality, with per-provider fallbacks.
    pub fn resolved_dims(&self) -> usize {
        self.dims.unwrap_or(match self.provider.as_str() {
            "hashing" => 384,
            _ => 0,
        })
    }
}

fn default_embedding_provider() -> String {
    "local".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct ImageEmbeddingConfig {
    #[serde(default = "default_image_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
}

impl Default for ImageEmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_image_provider(),
            model: None,
        }
    }
}

impl ImageEmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_image_provider() -> String {
    "disabled".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_url")]
    pub url: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    /// Name of the environment variable holding the bearer token.
    #[serde(default = "default_llm_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default = "default_max_prompt_chars")]
    pub max_prompt_chars: usize,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            url: default_llm_url(),
            model: default_llm_model(),
            api_key_env: default_llm_key_env(),
            max_tokens: default_max_tokens(),
            temperature: None,
            max_prompt_chars: default_max_prompt_chars(),
            timeout_secs: default_llm_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_llm_url() -> String {
    "http://localhost:8080".to_string()
}
fn default_llm_model() -> String {
    "ibm-granite/granite-3.3-8b-instruct".to_string()
}
fn default_llm_key_env() -> String {
    "LLM_API_KEY".to_string()
}
fn default_max_tokens() -> u32 {
    10_000
}
fn default_max_prompt_chars() -> usize {
    10_000
}
fn default_llm_timeout_secs() -> u64 {
    300
}

#[derive(Debug, Deserialize, Clone)]
pub struct CaptioningConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Vision model; defaults to `llm.model`.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_caption_prompt")]
    pub prompt: String,
    #[serde(default = "default_caption_max_tokens")]
    pub max_tokens: u32,
}

impl Default for CaptioningConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            model: None,
            prompt: default_caption_prompt(),
            max_tokens: default_caption_max_tokens(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_caption_prompt() -> String {
    "Describe this image in detail, including any visible text.".to_string()
}
fn default_caption_max_tokens() -> u32 {
    512
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default)]
    pub mode: ChunkMode,
    #[serde(default = "default_chunk_size")]
    pub size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            mode: ChunkMode::Lines,
            size: default_chunk_size(),
            overlap: default_chunk_overlap(),
        }
    }
}

impl ChunkingConfig {
    pub fn chunker(&self) -> docrag_core::Result<Chunker> {
        Chunker::new(self.mode, self.size, self.overlap)
    }
}

fn default_chunk_size() -> usize {
    25
}
fn default_chunk_overlap() -> usize {
    4
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_k")]
    pub k: i64,
    #[serde(default)]
    pub score_threshold: Option<f32>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k: default_k(),
            score_threshold: None,
        }
    }
}

fn default_k() -> i64 {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_summary_input_chars")]
    pub summary_input_chars: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
            summary_input_chars: default_summary_input_chars(),
        }
    }
}

fn default_workers() -> usize {
    4
}
fn default_queue_capacity() -> usize {
    64
}
fn default_summary_input_chars() -> usize {
    16_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct NamingConfig {
    #[serde(default = "default_prefix")]
    pub prefix: String,
}

impl Default for NamingConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
        }
    }
}

impl NamingConfig {
    pub fn naming(&self) -> CollectionNaming {
        CollectionNaming::new(self.prefix.clone())
    }
}

fn default_prefix() -> String {
    "user_".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// `pretty` or `json`.
    #[serde(default = "default_log_format")]
    pub format: String,
    /// Default filter when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: default_log_format(),
            level: default_log_level(),
        }
    }
}

fn default_log_format() -> String {
    "pretty".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate a TOML document.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    // Chunking: surfaces as InvalidConfiguration
    config.chunking.chunker()?;

    if config.retrieval.k < 1 {
        anyhow::bail!("retrieval.k must be >= 1");
    }

    if config.ingest.workers == 0 {
        anyhow::bail!("ingest.workers must be > 0");
    }
    if config.ingest.queue_capacity == 0 {
        anyhow::bail!("ingest.queue_capacity must be > 0");
    }

    match config.db.provider.as_str() {
        "sqlite" | "memory" => {}
        other => anyhow::bail!("Unknown db provider: '{}'. Must be sqlite or memory.", other),
    }

    match config.vector.provider.as_str() {
        "opensearch" | "memory" => {}
        other => anyhow::bail!(
            "Unknown vector provider: '{}'. Must be opensearch or memory.",
            other
        ),
    }

    match config.embedding.provider.as_str() {
        "openai" | "ollama" => {
            if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
                anyhow::bail!(
                    "embedding.dims must be > 0 when provider is '{}'",
                    config.embedding.provider
                );
            }
            if config.embedding.model.is_none() {
                anyhow::bail!(
                    "embedding.model must be specified when provider is '{}'",
                    config.embedding.provider
                );
            }
        }
        "local" | "hashing" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be openai, ollama, local, or hashing.",
            other
        ),
    }

    match config.image_embedding.provider.as_str() {
        "disabled" | "local" => {}
        other => anyhow::bail!(
            "Unknown image_embedding provider: '{}'. Must be disabled or local.",
            other
        ),
    }

    match config.logging.format.as_str() {
        "pretty" | "json" => {}
        other => anyhow::bail!("Unknown logging.format: '{}'. Must be pretty or json.", other),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use docrag_core::RagError;

    const MINIMAL: &str = r#"
        [db]
        path = "./data/docrag.sqlite"
    "#;

    #[test]
    fn minimal_config_uses_defaults() {
        let config = parse_config(MINIMAL).unwrap();
        assert_eq!(config.db.provider, "sqlite");
        assert_eq!(config.chunking.size, 25);
        assert_eq!(config.chunking.overlap, 4);
        assert_eq!(config.chunking.mode, ChunkMode::Lines);
        assert_eq!(config.retrieval.k, 3);
        assert_eq!(config.llm.max_tokens, 10_000);
        assert_eq!(config.llm.max_prompt_chars, 10_000);
        assert_eq!(config.llm.timeout_secs, 300);
        assert_eq!(config.llm.max_retries, 5);
        assert_eq!(config.ingest.workers, 4);
        assert_eq!(config.ingest.summary_input_chars, 16_000);
        assert_eq!(config.naming.prefix, "user_");
        assert!(!config.image_embedding.is_enabled());
    }

    #[test]
    fn overlap_not_below_size_is_invalid_configuration() {
        let toml = format!("{}\n[chunking]\nsize = 4\noverlap = 4\n", MINIMAL);
        let err = parse_config(&toml).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RagError>(),
            Some(RagError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn rejects_unknown_providers_and_bad_values() {
        let bad_vector = format!("{}\n[vector]\nprovider = \"qdrant\"\n", MINIMAL);
        assert!(parse_config(&bad_vector).is_err());

        let bad_k = format!("{}\n[retrieval]\nk = 0\n", MINIMAL);
        assert!(parse_config(&bad_k).is_err());

        let no_workers = format!("{}\n[ingest]\nworkers = 0\n", MINIMAL);
        assert!(parse_config(&no_workers).is_err());

        let openai_without_dims = format!(
            "{}\n[embedding]\nprovider = \"openai\"\nmodel = \"text-embedding-3-small\"\n",
            MINIMAL
        );
        assert!(parse_config(&openai_without_dims).is_err());
    }

    #[test]
    fn char_mode_parses() {
        let toml = format!("{}\n[chunking]\nmode = \"chars\"\nsize = 800\noverlap = 100\n", MINIMAL);
        let config = parse_config(&toml).unwrap();
        assert_eq!(config.chunking.mode, ChunkMode::Chars);
    }
}
