//! OpenSearch-backed [`VectorIndex`] and [`ImageIndex`] over the REST API.
//!
//! Text chunks are stored as `{text, embedding, metadata}` documents in a
//! k-NN index (HNSW, cosine). `metadata.doc_name` carries a `keyword`
//! sub-field so that existence probes, filters and deletes are exact
//! term matches.
//!
//! Every bulk action carries a deterministic `_id` (see [`chunk_id`] and
//! [`image_id`]), so a retried `_bulk` overwrites instead of appending.
//!
//! | Operation | Request |
//! |-----------|---------|
//! | exists | `HEAD /{index}` |
//! | create | `PUT /{index}` with k-NN mapping |
//! | drop | `DELETE /{index}` |
//! | add | `POST /_bulk?refresh=true` |
//! | search | `POST /{index}/_search` with a `knn` query |
//! | probe | `POST /{index}/_search` with a size-1 `term` query |
//! | delete | `POST /{index}/_delete_by_query?refresh=true` |

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use docrag_core::embedding::Embedder;
use docrag_core::models::{ChunkMetadata, ImageRecord, SearchHit};
use docrag_core::store::{ImageIndex, VectorIndex};
use docrag_core::{RagError, Result};

use crate::config::VectorConfig;
use crate::http::RetryingClient;

const SERVICE: &str = "opensearch";
const DOC_NAME_FIELD: &str = "metadata.doc_name.keyword";

/// Connection details shared by the text and image indices.
#[derive(Clone)]
pub struct OpenSearchClient {
    base_url: String,
    http: RetryingClient,
    auth: Option<(String, String)>,
}

impl OpenSearchClient {
    pub fn new(config: &VectorConfig, http: RetryingClient) -> Self {
        let auth = config.username.clone().map(|user| {
            let password = std::env::var(&config.password_env).unwrap_or_default();
            (user, password)
        });
        Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            http,
            auth,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn authed(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth {
            Some((user, pass)) => req.basic_auth(user, Some(pass)),
            None => req,
        }
    }

    pub async fn index_exists(&self, index: &str) -> Result<bool> {
        let url = self.url(index);
        let resp = self.http.send(|c| self.authed(c.head(&url))).await?;
        match resp.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            s => Err(RagError::backend(SERVICE, format!("HEAD {} returned {}", index, s))),
        }
    }

    /// Create `index` with `body`. An already-existing index is success.
    pub async fn create_index(&self, index: &str, body: &Value) -> Result<()> {
        let url = self.url(index);
        let resp = self
            .http
            .send(|c| self.authed(c.put(&url)).json(body))
            .await?;
        let status = resp.status();
        if status.is_success() {
            info!(index = %index, "created index");
            return Ok(());
        }
        let text = resp.text().await.unwrap_or_default();
        if status == StatusCode::BAD_REQUEST && text.contains("resource_already_exists_exception") {
            debug!(index = %index, "index created concurrently");
            return Ok(());
        }
        Err(RagError::backend(
            SERVICE,
            format!("create index {} failed ({}): {}", index, status, text),
        ))
    }

    pub async fn delete_index(&self, index: &str) -> Result<()> {
        let url = self.url(index);
        let resp = self.http.send(|c| self.authed(c.delete(&url))).await?;
        match resp.status() {
            s if s.is_success() => {
                info!(index = %index, "dropped index");
                Ok(())
            }
            StatusCode::NOT_FOUND => Ok(()),
            s => Err(RagError::backend(SERVICE, format!("DELETE {} returned {}", index, s))),
        }
    }

    /// Send an NDJSON bulk body; any per-item error fails the call.
    pub async fn bulk(&self, index: &str, ndjson: String) -> Result<usize> {
        let url = self.url("_bulk?refresh=true");
        let resp = self
            .http
            .send(|c| {
                self.authed(c.post(&url))
                    .header("Content-Type", "application/x-ndjson")
                    .body(ndjson.clone())
            })
            .await
            .map_err(|e| RagError::index_write(index, e.to_string()))?;
        let status = resp.status();
        let body: Value = resp
            .json()
            .await
            .map_err(|e| RagError::index_write(index, format!("invalid bulk response: {}", e)))?;
        if !status.is_success() {
            return Err(RagError::index_write(index, format!("bulk returned {}: {}", status, body)));
        }
        if body["errors"].as_bool().unwrap_or(false) {
            return Err(RagError::index_write(index, first_bulk_error(&body)));
        }
        Ok(body["items"].as_array().map(|a| a.len()).unwrap_or(0))
    }

    pub async fn search(&self, index: &str, body: &Value) -> Result<Value> {
        let url = self.url(&format!("{}/_search", index));
        self.http
            .json(|c| self.authed(c.post(&url)).json(body))
            .await
    }

    /// Delete documents matching `query`. A missing index deletes nothing.
    pub async fn delete_by_query(&self, index: &str, query: &Value) -> Result<u64> {
        let url = self.url(&format!("{}/_delete_by_query?refresh=true", index));
        let resp = self
            .http
            .send(|c| self.authed(c.post(&url)).json(query))
            .await?;
        match resp.status() {
            StatusCode::NOT_FOUND => Ok(0),
            s if s.is_success() => {
                let body: Value = resp
                    .json()
                    .await
                    .map_err(|e| RagError::backend(SERVICE, e.to_string()))?;
                Ok(body["deleted"].as_u64().unwrap_or(0))
            }
            s => {
                let text = resp.text().await.unwrap_or_default();
                Err(RagError::backend(
                    SERVICE,
                    format!("delete_by_query on {} failed ({}): {}", index, s, text),
                ))
            }
        }
    }

    /// `GET /` reachability check.
    pub async fn ping(&self) -> Result<()> {
        let url = self.url("");
        self.http.send_ok(|c| self.authed(c.get(&url))).await?;
        Ok(())
    }
}

fn first_bulk_error(body: &Value) -> String {
    body["items"]
        .as_array()
        .and_then(|items| {
            items.iter().find_map(|item| {
                item.as_object()
                    .and_then(|o| o.values().next())
                    .and_then(|action| action.get("error"))
                    .map(|e| e.to_string())
            })
        })
        .unwrap_or_else(|| "bulk request reported errors".to_string())
}

/// k-NN mapping for a text chunk index.
pub fn text_index_body(dims: usize) -> Value {
    json!({
        "settings": { "index": { "knn": true } },
        "mappings": {
            "properties": {
                "embedding": {
                    "type": "knn_vector",
                    "dimension": dims,
                    "method": { "name": "hnsw", "space_type": "cosinesimil", "engine": "lucene" }
                },
                "text": { "type": "text" },
                "metadata": {
                    "properties": {
                        "doc_name": {
                            "type": "text",
                            "fields": { "keyword": { "type": "keyword" } }
                        },
                        "doc_content": { "type": "text", "index": false },
                        "timestamp": { "type": "date" },
                        "chunk_index": { "type": "integer" },
                        "total_chunks": { "type": "integer" }
                    }
                }
            }
        }
    })
}

/// k-NN mapping for a per-user image index.
pub fn image_index_body(dims: usize) -> Value {
    json!({
        "settings": { "index": { "knn": true } },
        "mappings": {
            "properties": {
                "image_vector": {
                    "type": "knn_vector",
                    "dimension": dims,
                    "method": { "name": "hnsw", "space_type": "cosinesimil", "engine": "lucene" }
                },
                "image_path": { "type": "keyword" },
                "filename": { "type": "keyword" },
                "caption": { "type": "text" },
                "timestamp": { "type": "date" },
                "user_id": { "type": "keyword" }
            }
        }
    })
}

/// `bool.should` over exact doc names.
pub fn doc_name_filter(names: &[String]) -> Value {
    let should: Vec<Value> = names
        .iter()
        .map(|n| json!({ "term": { DOC_NAME_FIELD: n } }))
        .collect();
    json!({ "bool": { "should": should, "minimum_should_match": 1 } })
}

pub fn knn_query(
    vector: &[f32],
    k: usize,
    filter: Option<&[String]>,
    score_threshold: Option<f32>,
) -> Value {
    let mut knn = json!({ "vector": vector, "k": k });
    if let Some(names) = filter {
        knn["filter"] = doc_name_filter(names);
    }
    let mut body = json!({
        "size": k,
        "_source": ["text", "metadata"],
        "query": { "knn": { "embedding": knn } }
    });
    if let Some(min) = score_threshold {
        body["min_score"] = json!(min);
    }
    body
}

/// Document id for chunk `chunk_index` of `doc_name`.
pub fn chunk_id(doc_name: &str, chunk_index: usize) -> String {
    hashed_id(&format!("{}#{}", doc_name, chunk_index))
}

/// Document id for an image entry.
pub fn image_id(filename: &str) -> String {
    hashed_id(filename)
}

// `_id` is capped at 512 bytes; file names are not.
fn hashed_id(key: &str) -> String {
    format!("{:x}", Sha256::digest(key.as_bytes()))
}

/// NDJSON `_bulk` body of `(id, document)` pairs.
pub fn bulk_body(index: &str, docs: &[(String, Value)]) -> Result<String> {
    let mut out = String::new();
    for (id, doc) in docs {
        let action = json!({ "index": { "_index": index, "_id": id } });
        for line in [&action, doc] {
            let encoded = serde_json::to_string(line)
                .map_err(|e| RagError::index_write(index, e.to_string()))?;
            out.push_str(&encoded);
            out.push('\n');
        }
    }
    Ok(out)
}

/// Turn a `_search` response into hits, skipping malformed entries.
pub fn parse_hits(body: &Value) -> Vec<SearchHit> {
    let Some(hits) = body["hits"]["hits"].as_array() else {
        return Vec::new();
    };
    hits.iter()
        .filter_map(|hit| {
            let source = &hit["_source"];
            let metadata: ChunkMetadata = match serde_json::from_value(source["metadata"].clone()) {
                Ok(m) => m,
                Err(e) => {
                    warn!(error = %e, "skipping hit with malformed metadata");
                    return None;
                }
            };
            Some(SearchHit {
                text: source["text"].as_str().unwrap_or_default().to_string(),
                metadata,
                score: hit["_score"].as_f64().unwrap_or(0.0) as f32,
            })
        })
        .collect()
}

fn total_hits(body: &Value) -> u64 {
    body["hits"]["total"]["value"]
        .as_u64()
        .or_else(|| body["hits"]["total"].as_u64())
        .unwrap_or_else(|| body["hits"]["hits"].as_array().map_or(0, |a| a.len() as u64))
}

pub struct OpenSearchVectorIndex {
    client: OpenSearchClient,
    embedder: Arc<dyn Embedder>,
}

impl OpenSearchVectorIndex {
    pub fn new(client: OpenSearchClient, embedder: Arc<dyn Embedder>) -> Self {
        Self { client, embedder }
    }
}

#[async_trait]
impl VectorIndex for OpenSearchVectorIndex {
    async fn ensure_index(&self, index: &str, drop_existing: bool) -> Result<()> {
        if drop_existing {
            self.client.delete_index(index).await?;
        } else if self.client.index_exists(index).await? {
            return Ok(());
        }
        self.client
            .create_index(index, &text_index_body(self.embedder.dims()))
            .await
    }

    async fn index_exists(&self, index: &str) -> Result<bool> {
        self.client.index_exists(index).await
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
            .map_err(|e| RagError::index_write(index, format!("embedding failed: {}", e)))?;
        if vectors.len() != chunks.len() {
            return Err(RagError::index_write(
                index,
                format!("expected {} vectors, got {}", chunks.len(), vectors.len()),
            ));
        }
        let docs: Vec<(String, Value)> = chunks
            .iter()
            .zip(vectors)
            .map(|((text, metadata), vector)| {
                (
                    chunk_id(&metadata.doc_name, metadata.chunk_index),
                    json!({ "text": text, "embedding": vector, "metadata": metadata }),
                )
            })
            .collect();
        let body = bulk_body(index, &docs)?;
        self.client.bulk(index, body).await
    }

    async fn similarity_search(
        &self,
        index: &str,
        query: &str,
        k: usize,
        filter: Option<&[String]>,
        score_threshold: Option<f32>,
    ) -> Result<Vec<SearchHit>> {
        let vector = self.embedder.embed_one(query).await?;
        let body = knn_query(&vector, k, filter, score_threshold);
        let response = self.client.search(index, &body).await?;
        let mut hits = parse_hits(&response);
        hits.truncate(k);
        Ok(hits)
    }

    async fn has_doc(&self, index: &str, doc_name: &str) -> Result<bool> {
        let body = json!({
            "size": 1,
            "_source": false,
            "query": { "bool": { "must": [ { "term": { DOC_NAME_FIELD: doc_name } } ] } }
        });
        let response = self.client.search(index, &body).await?;
        Ok(total_hits(&response) > 0)
    }

    async fn delete_by_doc_name(&self, index: &str, doc_name: &str) -> Result<u64> {
        let query = json!({ "query": { "term": { DOC_NAME_FIELD: doc_name } } });
        let deleted = self.client.delete_by_query(index, &query).await?;
        info!(index = %index, doc_name = %doc_name, deleted, "deleted chunks");
        Ok(deleted)
    }
}

pub struct OpenSearchImageIndex {
    client: OpenSearchClient,
    dims: usize,
}

impl OpenSearchImageIndex {
    pub fn new(client: OpenSearchClient, dims: usize) -> Self {
        Self { client, dims }
    }
}

#[async_trait]
impl ImageIndex for OpenSearchImageIndex {
    async fn ensure_index(&self, index: &str) -> Result<()> {
        if self.client.index_exists(index).await? {
            return Ok(());
        }
        self.client
            .create_index(index, &image_index_body(self.dims))
            .await
    }

    async fn index_exists(&self, index: &str) -> Result<bool> {
        self.client.index_exists(index).await
    }

    async fn add_image(&self, index: &str, record: &ImageRecord) -> Result<()> {
        let doc = serde_json::to_value(record)
            .map_err(|e| RagError::index_write(index, e.to_string()))?;
        let body = bulk_body(index, &[(image_id(&record.filename), doc)])?;
        self.client.bulk(index, body).await?;
        Ok(())
    }

    async fn delete_by_filename(&self, index: &str, filename: &str) -> Result<u64> {
        let query = json!({ "query": { "term": { "filename": filename } } });
        self.client.delete_by_query(index, &query).await
    }
}
