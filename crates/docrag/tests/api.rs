use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use docrag::config::parse_config;
use docrag::context::{AppContext, AppParts};
use docrag_core::embedding::HashingEmbedder;
use docrag_core::language::StopwordDetector;
use docrag_core::llm::{LanguageModel, TokenStream};
use docrag_core::store::memory::{InMemoryDocumentStore, InMemoryVectorIndex};
use docrag_core::Result;

/// Summarizes with fixed tokens and answers by echoing a marker; records
/// every answer prompt it sees.
#[derive(Default)]
struct ScriptedLlm {
    answer_prompts: Mutex<Vec<String>>,
}

#[async_trait]
impl LanguageModel for ScriptedLlm {
    async fn stream(&self, prompt: &str) -> Result<TokenStream> {
        let tokens: Vec<Result<String>> = if prompt.contains("Question:") {
            self.answer_prompts.lock().unwrap().push(prompt.to_string());
            vec![Ok("Alpha ".to_string()), Ok("is the first letter.".to_string())]
        } else {
            vec![Ok("Summary: ".to_string()), Ok("Alpha Beta Gamma notes.".to_string())]
        };
        Ok(Box::pin(futures::stream::iter(tokens)))
    }
}

struct TestServer {
    base: String,
    ctx: Arc<AppContext>,
    index: Arc<InMemoryVectorIndex>,
    llm: Arc<ScriptedLlm>,
    client: reqwest::Client,
}

async fn start() -> TestServer {
    let config = parse_config(
        r#"
        [db]
        provider = "memory"
        path = "unused"

        [vector]
        provider = "memory"

        [embedding]
        provider = "hashing"

        [chunking]
        size = 3
        overlap = 1
        "#,
    )
    .unwrap();

    let index = Arc::new(InMemoryVectorIndex::new(Arc::new(HashingEmbedder::new(128))));
    let llm = Arc::new(ScriptedLlm::default());
    let parts = AppParts {
        docs: Arc::new(InMemoryDocumentStore::new()),
        index: index.clone(),
        images: None,
        llm: llm.clone(),
        captioner: None,
        language: Arc::new(StopwordDetector),
        llm_health: None,
    };
    let ctx = Arc::new(AppContext::from_parts(config, parts).unwrap());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = docrag::server::router(ctx.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestServer {
        base: format!("http://{}", addr),
        ctx,
        index,
        llm,
        client: reqwest::Client::new(),
    }
}

impl TestServer {
    async fn upload(&self, user: &str, files: &[(&str, &str)]) -> Vec<Value> {
        let mut form = reqwest::multipart::Form::new().text("user_id", user.to_string());
        for (name, body) in files {
            form = form.part(
                "files",
                reqwest::multipart::Part::bytes(body.as_bytes().to_vec()).file_name(name.to_string()),
            );
        }
        let resp = self
            .client
            .post(format!("{}/upload-files", self.base))
            .multipart(form)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let body = resp.text().await.unwrap();
        body.split("\n\n")
            .filter_map(|frame| frame.strip_prefix("data: "))
            .map(|json| serde_json::from_str(json).unwrap())
            .collect()
    }

    async fn documents(&self, user: &str) -> Vec<Value> {
        self.client
            .get(format!("{}/user_exists_check", self.base))
            .query(&[("user_id", user)])
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap()
    }

    async fn ask(&self, user: &str, query: &str, names: Option<&str>) -> String {
        let mut form = vec![("query", query), ("user_id", user)];
        if let Some(n) = names {
            form.push(("document_names", n));
        }
        self.client
            .post(format!("{}/ask-query", self.base))
            .form(&form)
            .send()
            .await
            .unwrap()
            .text()
            .await
            .unwrap()
    }
}

fn event_names(events: &[Value]) -> Vec<String> {
    events
        .iter()
        .map(|e| e["event"].as_str().unwrap().to_string())
        .collect()
}

fn notes() -> String {
    (1..=8)
        .map(|i| format!("Alpha Beta Gamma line {}", i))
        .collect::<Vec<_>>()
        .join("\n")
}

#[tokio::test]
async fn upload_streams_events_and_stores_document() {
    let server = start().await;
    let events = server.upload("Alice", &[("notes.txt", &notes())]).await;

    let names = event_names(&events);
    assert_eq!(names.first().map(String::as_str), Some("document_start"));
    assert_eq!(names[1], "raw_content");
    assert!(names.iter().filter(|n| *n == "summary_chunk").count() >= 1);
    assert_eq!(names[names.len() - 2], "document_end");
    assert_eq!(names.last().map(String::as_str), Some("all_complete"));
    assert_eq!(events[0]["filename"], "notes.txt");
    assert_eq!(events[1]["doc-content"], notes());

    server.ctx.queue.wait_idle().await;
    let docs = server.documents("alice").await;
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0]["doc_name"], "notes.txt");
    assert_eq!(docs[0]["doc_summary"], "Alpha Beta Gamma notes.");
    assert!(docs[0]["_id"].as_str().is_some());
    assert!(docs[0]["rouge_score"]["rougeL"].as_f64().unwrap() > 0.0);
    // 8 lines, window 3, stride 2
    assert_eq!(server.index.chunk_count("user_alice", "notes.txt"), 4);
}

#[tokio::test]
async fn duplicate_upload_is_skipped() {
    let server = start().await;
    server.upload("alice", &[("notes.txt", &notes())]).await;
    server.ctx.queue.wait_idle().await;
    server.upload("alice", &[("notes.txt", "completely different")]).await;
    server.ctx.queue.wait_idle().await;

    let docs = server.documents("alice").await;
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0]["doc_content"], notes());
    assert_eq!(server.index.chunk_count("user_alice", "notes.txt"), 4);
}

#[tokio::test]
async fn unsupported_file_does_not_stop_the_batch() {
    let server = start().await;
    let events = server
        .upload("dave", &[("virus.exe", "MZ"), ("ok.md", "# Alpha")])
        .await;
    assert_eq!(
        event_names(&events)[..3],
        ["document_start", "error", "document_end"]
    );
    assert_eq!(events[1]["filename"], "virus.exe");
    server.ctx.queue.wait_idle().await;
    let docs = server.documents("dave").await;
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0]["doc_name"], "ok.md");
}

#[tokio::test]
async fn unknown_user_has_no_documents() {
    let server = start().await;
    assert!(server.documents("nobody").await.is_empty());

    let resp = server
        .client
        .get(format!("{}/user_exists_check", server.base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn deleting_unknown_file_reports_not_found() {
    let server = start().await;
    let resp = server
        .client
        .delete(format!("{}/delete-file", server.base))
        .query(&[("user_id", "alice"), ("filename", "never.pdf")])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["deleted_from_mongodb"], false);
    assert_eq!(body["deleted_from_opensearch"], false);
    assert!(body["message"].as_str().unwrap().contains("was not found"));
}

#[tokio::test]
async fn delete_removes_from_both_stores() {
    let server = start().await;
    server.upload("alice", &[("notes.txt", &notes())]).await;
    server.ctx.queue.wait_idle().await;

    let body: Value = server
        .client
        .delete(format!("{}/delete-file", server.base))
        .query(&[("user_id", "Alice"), ("filename", "some/dir/notes%2Etxt")])
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["normalized_filename"], "notes.txt");
    assert_eq!(body["deleted_from_mongodb"], true);
    assert_eq!(body["deleted_from_opensearch"], true);
    assert!(body["errors"].is_null());
    assert!(server.documents("alice").await.is_empty());
    assert_eq!(server.index.chunk_count("user_alice", "notes.txt"), 0);
}

#[tokio::test]
async fn delete_requires_parameters() {
    let server = start().await;
    let resp = server
        .client
        .delete(format!("{}/delete-file", server.base))
        .query(&[("user_id", "alice")])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");
}

#[tokio::test]
async fn ask_falls_back_when_requested_documents_are_missing() {
    let server = start().await;
    server.upload("alice", &[("notes.txt", &notes())]).await;
    server.ctx.queue.wait_idle().await;

    let answer = server
        .ask("alice", "What is Alpha?", Some("a.pdf, b.pdf"))
        .await;
    assert_eq!(answer, "Alpha is the first letter.");

    let prompts = server.llm.answer_prompts.lock().unwrap();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("Alpha Beta Gamma line"));
    assert!(prompts[0].contains("Question:\nWhat is Alpha?"));
}

#[tokio::test]
async fn ask_without_documents_streams_an_error_record() {
    let server = start().await;
    let answer = server.ask("ghost", "What is Alpha?", None).await;
    let json: Value = serde_json::from_str(
        answer.trim_start_matches("data: ").trim_end(),
    )
    .unwrap();
    assert!(json["error"].as_str().is_some());
    assert!(server.llm.answer_prompts.lock().unwrap().is_empty());
}

#[tokio::test]
async fn health_endpoints() {
    let server = start().await;
    let health: Value = server
        .client
        .get(format!("{}/health", server.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");

    let llm = server
        .client
        .get(format!("{}/llm/health", server.base))
        .send()
        .await
        .unwrap();
    assert_eq!(llm.status(), 200);
}
