//! Streaming upload and answer flows.
//!
//! An upload batch becomes one event stream. For each file:
//!
//! ```text
//! document_start → raw_content → summary_chunk* → document_end
//! ```
//!
//! then `all_complete` once every file is done. Any per-file failure
//! (extraction, captioning, summarization) emits an `error` event for
//! that file and the stream moves on. Summaries are only kept when the
//! LLM stream finished cleanly; a failed summary leaves the document
//! without one. The collected batch is handed to the background queue
//! before `all_complete` is sent.
//!
//! Dropping a returned stream (client disconnect) drops any in-flight
//! LLM token stream with it.

use std::sync::Arc;

use futures::{Stream, StreamExt};
use serde::Serialize;
use tracing::{error, info, warn};

use docrag_core::llm::LanguageModel;
use docrag_core::models::{IngestRecord, RecordKind};
use docrag_core::naming::{normalize_user_id, parse_document_names, sanitize_filename};
use docrag_core::prompt::{build_rag_prompt, build_summary_prompt, clean_summary_text};
use docrag_core::retrieve::RetrieveRequest;
use docrag_core::{RagError, Result};

use crate::context::AppContext;
use crate::extract::{extract, Extracted};
use crate::worker::IngestJob;

/// One uploaded file as received.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// Events on the upload stream, serialized as `{"event": "<name>", ...}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StreamEvent {
    DocumentStart {
        filename: String,
    },
    RawContent {
        filename: String,
        #[serde(rename = "doc-content")]
        content: String,
        length: usize,
    },
    SummaryChunk {
        #[serde(rename = "doc-summary")]
        chunk: String,
    },
    DocumentEnd {
        filename: String,
    },
    AllComplete,
    Error {
        #[serde(skip_serializing_if = "Option::is_none")]
        filename: Option<String>,
        message: String,
    },
}

impl StreamEvent {
    fn error(filename: Option<&str>, message: impl Into<String>) -> Self {
        StreamEvent::Error {
            filename: filename.map(str::to_string),
            message: message.into(),
        }
    }

    /// Server-sent-event framing: `data: {json}\n\n`.
    pub fn to_sse(&self) -> String {
        let json = serde_json::to_string(self).unwrap_or_else(|e| {
            format!(r#"{{"event":"error","message":"unserializable event: {}"}}"#, e)
        });
        format!("data: {}\n\n", json)
    }
}

/// Drive the upload stream for `files` owned by `user_id`.
pub fn upload_events(
    ctx: Arc<AppContext>,
    user_id: String,
    files: Vec<UploadedFile>,
) -> impl Stream<Item = StreamEvent> + Send + 'static {
    async_stream::stream! {
        let user = normalize_user_id(&user_id);
        let mut records = Vec::with_capacity(files.len());

        for file in files {
            let filename = sanitize_filename(&file.filename);
            if filename.is_empty() {
                yield StreamEvent::error(None, format!("invalid filename '{}'", file.filename));
                continue;
            }
            yield StreamEvent::DocumentStart { filename: filename.clone() };

            let extracted = match extract(&filename, &file.bytes) {
                Ok(e) => e,
                Err(e) => {
                    warn!(user = %user, filename = %filename, stage = "extract", error = %e, "skipping file");
                    yield StreamEvent::error(Some(&filename), e.to_string());
                    yield StreamEvent::DocumentEnd { filename };
                    continue;
                }
            };

            let (content, kind) = match extracted {
                Extracted::Text(text) => (text, RecordKind::Text),
                Extracted::Image { bytes, mime, metadata } => {
                    let caption = match &ctx.captioner {
                        Some(captioner) => captioner.caption(&bytes, mime).await,
                        None => Err(RagError::UpstreamLlm("image captioning is disabled".into())),
                    };
                    match caption {
                        Ok(caption) => (caption, RecordKind::Image { bytes, metadata }),
                        Err(e) => {
                            warn!(user = %user, filename = %filename, stage = "caption", error = %e, "skipping image");
                            yield StreamEvent::error(Some(&filename), e.to_string());
                            yield StreamEvent::DocumentEnd { filename };
                            continue;
                        }
                    }
                }
            };

            yield StreamEvent::RawContent {
                filename: filename.clone(),
                length: content.chars().count(),
                content: content.clone(),
            };

            let mut record = IngestRecord {
                filename: filename.clone(),
                content,
                summary: None,
                kind,
            };

            if !record.is_image() {
                let language = ctx.language.detect(&record.content);
                let prompt = build_summary_prompt(
                    &language,
                    &record.content,
                    ctx.config.ingest.summary_input_chars,
                );
                let mut summary = String::new();
                let mut completed = false;
                match ctx.llm.stream(&prompt).await {
                    Ok(mut tokens) => {
                        completed = true;
                        while let Some(token) = tokens.next().await {
                            match token {
                                Ok(t) => {
                                    summary.push_str(&t);
                                    yield StreamEvent::SummaryChunk { chunk: t };
                                }
                                Err(e) => {
                                    error!(user = %user, filename = %filename, stage = "summarize", error = %e, "summary stream failed");
                                    yield StreamEvent::error(Some(&filename), e.to_string());
                                    completed = false;
                                    break;
                                }
                            }
                        }
                    }
                    Err(e) => {
                        error!(user = %user, filename = %filename, stage = "summarize", error = %e, "summary request failed");
                        yield StreamEvent::error(Some(&filename), e.to_string());
                    }
                }
                if completed {
                    let cleaned = clean_summary_text(&summary);
                    if !cleaned.is_empty() {
                        record.summary = Some(cleaned);
                    }
                }
            }

            records.push(record);
            yield StreamEvent::DocumentEnd { filename };
        }

        if !records.is_empty() {
            let count = records.len();
            match ctx.queue.enqueue(IngestJob { user_id: user.clone(), records }).await {
                Ok(()) => info!(user = %user, documents = count, "queued for background ingestion"),
                Err(e) => {
                    error!(user = %user, documents = count, stage = "enqueue", error = %e, "ingestion not queued");
                    yield StreamEvent::error(None, e.to_string());
                }
            }
        }
        yield StreamEvent::AllComplete;
    }
}

/// Error record on the answer stream: `data: {"error": "..."}\n\n`.
pub fn answer_error(message: &str) -> String {
    format!("data: {}\n\n", serde_json::json!({ "error": message }))
}

/// Retrieve context and build the prompt for `query`.
pub async fn prepare_answer(
    ctx: &AppContext,
    query: &str,
    user_id: &str,
    document_names: Option<&str>,
) -> Result<String> {
    if query.trim().is_empty() {
        return Err(RagError::InvalidArgument("query must not be empty".into()));
    }
    let handles = ctx.coordinator.names(user_id);
    let requested = document_names.map(parse_document_names).unwrap_or_default();
    let retrieval = ctx
        .retriever
        .retrieve(RetrieveRequest {
            query,
            collection: &handles.text_index,
            requested_doc_names: &requested,
            k: ctx.config.retrieval.k,
            score_threshold: ctx.config.retrieval.score_threshold,
        })
        .await?;
    info!(
        user = %handles.user_id,
        chunks = retrieval.hits.len(),
        scope = ?retrieval.scope,
        "retrieved context"
    );
    let texts = retrieval.texts();
    if texts.is_empty() {
        return Err(RagError::InvalidArgument(
            "no documents found to answer from; upload documents first".into(),
        ));
    }
    build_rag_prompt(query, &texts)
}

/// Plain-text answer tokens, or a single error record.
pub fn answer_events(
    ctx: Arc<AppContext>,
    query: String,
    user_id: String,
    document_names: Option<String>,
) -> impl Stream<Item = String> + Send + 'static {
    async_stream::stream! {
        let prompt = match prepare_answer(&ctx, &query, &user_id, document_names.as_deref()).await {
            Ok(p) => p,
            Err(e) => {
                warn!(user = %user_id, stage = "retrieve", error = %e, "cannot answer");
                yield answer_error(&e.to_string());
                return;
            }
        };
        let llm: Arc<dyn LanguageModel> = ctx.llm.clone();
        match llm.stream(&prompt).await {
            Ok(mut tokens) => {
                while let Some(token) = tokens.next().await {
                    match token {
                        Ok(t) => yield t,
                        Err(e) => {
                            error!(user = %user_id, stage = "answer", error = %e, "answer stream failed");
                            yield answer_error(&e.to_string());
                            return;
                        }
                    }
                }
            }
            Err(e) => {
                error!(user = %user_id, stage = "answer", error = %e, "answer request failed");
                yield answer_error(&e.to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use docrag_core::embedding::HashingEmbedder;
    use docrag_core::llm::TokenStream;
    use docrag_core::store::DocumentStore;

    use crate::config::parse_config;
    use crate::context::AppParts;

    /// Replies with fixed tokens. Prompts containing "EXPLODE" fail
    /// mid-stream; prompts containing "REFUSE" fail before any token.
    struct ScriptedLlm;

    #[async_trait]
    impl LanguageModel for ScriptedLlm {
        async fn stream(&self, prompt: &str) -> Result<TokenStream> {
            if prompt.contains("REFUSE") {
                return Err(RagError::UpstreamLlm("HTTP 401: unauthorized".into()));
            }
            if prompt.contains("EXPLODE") {
                let items: Vec<Result<String>> = vec![
                    Ok("partial".to_string()),
                    Err(RagError::UpstreamLlm("connection reset".into())),
                ];
                return Ok(Box::pin(futures::stream::iter(items)));
            }
            let items: Vec<Result<String>> =
                vec![Ok("Summary: ".to_string()), Ok("short text".to_string())];
            Ok(Box::pin(futures::stream::iter(items)))
        }
    }

    fn context() -> Arc<AppContext> {
        let config = parse_config("[db]\nprovider = \"memory\"\npath = \"unused\"\n").unwrap();
        let parts = AppParts::in_memory(Arc::new(HashingEmbedder::new(64)), Arc::new(ScriptedLlm));
        Arc::new(AppContext::from_parts(config, parts).unwrap())
    }

    fn file(name: &str, body: &str) -> UploadedFile {
        UploadedFile {
            filename: name.into(),
            bytes: body.as_bytes().to_vec(),
        }
    }

    fn names(events: &[StreamEvent]) -> Vec<&'static str> {
        events
            .iter()
            .map(|e| match e {
                StreamEvent::DocumentStart { .. } => "document_start",
                StreamEvent::RawContent { .. } => "raw_content",
                StreamEvent::SummaryChunk { .. } => "summary_chunk",
                StreamEvent::DocumentEnd { .. } => "document_end",
                StreamEvent::AllComplete => "all_complete",
                StreamEvent::Error { .. } => "error",
            })
            .collect()
    }

    #[test]
    fn events_serialize_with_wire_names() {
        let raw = StreamEvent::RawContent {
            filename: "a.txt".into(),
            content: "Alpha".into(),
            length: 5,
        };
        let json: serde_json::Value = serde_json::from_str(
            raw.to_sse().trim_start_matches("data: ").trim_end(),
        )
        .unwrap();
        assert_eq!(json["event"], "raw_content");
        assert_eq!(json["doc-content"], "Alpha");
        assert_eq!(json["length"], 5);
        assert_eq!(
            StreamEvent::AllComplete.to_sse(),
            "data: {\"event\":\"all_complete\"}\n\n"
        );
        let chunk = serde_json::to_value(StreamEvent::SummaryChunk { chunk: "x".into() }).unwrap();
        assert_eq!(chunk["doc-summary"], "x");
    }

    #[tokio::test]
    async fn upload_stream_sequence_and_background_ingest() {
        let ctx = context();
        let events: Vec<StreamEvent> = upload_events(
            ctx.clone(),
            "Alice".into(),
            vec![file("dir/a.txt", "A short text about Alpha\nGamma")],
        )
        .collect()
        .await;
        assert_eq!(
            names(&events),
            vec!["document_start", "raw_content", "summary_chunk", "summary_chunk", "document_end", "all_complete"]
        );

        ctx.queue.wait_idle().await;
        let stored = ctx.docs.find_by_doc_name("user_alice", "a.txt").await.unwrap().unwrap();
        assert_eq!(stored.record.doc_summary, "short text");
        assert!(stored.record.rouge_score.rouge1 > 0.0);
    }

    #[tokio::test]
    async fn failures_are_isolated_per_document() {
        let ctx = context();
        let events: Vec<StreamEvent> = upload_events(
            ctx.clone(),
            "bob".into(),
            vec![
                file("bad.exe", "MZ"),
                file("boom.txt", "EXPLODE the summary"),
                file("ok.txt", "Alpha"),
            ],
        )
        .collect()
        .await;
        assert_eq!(
            names(&events),
            vec![
                "document_start", "error", "document_end",
                "document_start", "raw_content", "summary_chunk", "error", "document_end",
                "document_start", "raw_content", "summary_chunk", "summary_chunk", "document_end",
                "all_complete",
            ]
        );

        ctx.queue.wait_idle().await;
        let boom = ctx.docs.find_by_doc_name("user_bob", "boom.txt").await.unwrap().unwrap();
        assert_eq!(boom.record.doc_summary, "");
        assert_eq!(boom.record.rouge_score.rouge1, 0.0);
        assert!(ctx.docs.find_by_doc_name("user_bob", "bad.exe").await.unwrap().is_none());
        assert!(ctx.docs.find_by_doc_name("user_bob", "ok.txt").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn rejected_summary_request_still_ends_the_document() {
        let ctx = context();
        let events: Vec<StreamEvent> = upload_events(
            ctx.clone(),
            "erin".into(),
            vec![file("denied.txt", "REFUSE this one"), file("ok.txt", "Alpha")],
        )
        .collect()
        .await;
        assert_eq!(
            names(&events),
            vec![
                "document_start", "raw_content", "error", "document_end",
                "document_start", "raw_content", "summary_chunk", "summary_chunk", "document_end",
                "all_complete",
            ]
        );
        match &events[2] {
            StreamEvent::Error { filename, message } => {
                assert_eq!(filename.as_deref(), Some("denied.txt"));
                assert!(message.contains("unauthorized"));
            }
            other => panic!("expected error event, got {:?}", other),
        }

        ctx.queue.wait_idle().await;
        let denied = ctx.docs.find_by_doc_name("user_erin", "denied.txt").await.unwrap().unwrap();
        assert_eq!(denied.record.doc_summary, "");
        assert_eq!(denied.record.rouge_score, Default::default());
    }

    #[tokio::test]
    async fn image_without_captioner_is_reported() {
        let ctx = context();
        let img = image::RgbImage::new(2, 2);
        let mut png = std::io::Cursor::new(Vec::new());
        img.write_to(&mut png, image::ImageFormat::Png).unwrap();
        let events: Vec<StreamEvent> = upload_events(
            ctx,
            "carol".into(),
            vec![UploadedFile {
                filename: "pic.png".into(),
                bytes: png.into_inner(),
            }],
        )
        .collect()
        .await;
        assert_eq!(names(&events), vec!["document_start", "error", "document_end", "all_complete"]);
    }

    #[tokio::test]
    async fn answer_without_documents_is_an_error_record() {
        let ctx = context();
        let out: Vec<String> =
            answer_events(ctx, "What is Alpha?".into(), "nobody".into(), None).collect().await;
        assert_eq!(out.len(), 1);
        assert!(out[0].starts_with("data: {\"error\":"));
    }

    #[tokio::test]
    async fn empty_query_is_rejected() {
        let ctx = context();
        let err = prepare_answer(&ctx, "  ", "alice", None).await.unwrap_err();
        assert!(matches!(err, RagError::InvalidArgument(_)));
    }
}
