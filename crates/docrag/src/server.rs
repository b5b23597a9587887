//! HTTP surface (axum).
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/upload-files` | Multipart `files` + `user_id`; streams upload events |
//! | `POST` | `/ask-query` | Form `query`, `user_id`, `document_names`; streams answer text |
//! | `GET`, `POST` | `/user_exists_check?user_id=` | The user's stored documents |
//! | `DELETE` | `/delete-file?user_id=&filename=` | Remove one file from every store |
//! | `GET` | `/health` | Liveness (returns version) |
//! | `GET` | `/llm/health` | LLM endpoint reachability |
//!
//! # Error Contract
//!
//! Non-streaming errors use:
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "user_id is required" } }
//! ```
//!
//! Errors inside a stream are stream records instead (`error` events on
//! uploads, `data: {"error": ...}` on answers), since the status line has
//! already been sent.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{DefaultBodyLimit, Multipart, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Form, Json, Router,
};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use docrag_core::naming::normalize_user_id;
use docrag_core::RagError;

use crate::context::AppContext;
use crate::orchestrator::{answer_events, upload_events, UploadedFile};

type AppState = Arc<AppContext>;

/// Build the router over a shared context.
pub fn router(ctx: Arc<AppContext>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    let body_limit = ctx.config.server.max_upload_bytes;

    Router::new()
        .route("/upload-files", post(handle_upload))
        .route("/ask-query", post(handle_ask))
        .route(
            "/user_exists_check",
            get(handle_user_exists).post(handle_user_exists),
        )
        .route("/delete-file", delete(handle_delete))
        .route("/health", get(handle_health))
        .route("/llm/health", get(handle_llm_health))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .with_state(ctx)
}

/// Serve on `server.bind` until `shutdown` resolves.
pub async fn run_server<F>(ctx: Arc<AppContext>, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let bind_addr = ctx.config.server.bind.clone();
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "listening");
    axum::serve(listener, router(ctx))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

pub struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

impl From<RagError> for AppError {
    fn from(err: RagError) -> Self {
        let status = match &err {
            RagError::InvalidArgument(_) | RagError::Extraction { .. } => StatusCode::BAD_REQUEST,
            RagError::StoreUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            RagError::UpstreamLlm(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        AppError {
            status,
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

/// Reject a missing or blank parameter.
fn required(value: Option<String>, message: &str) -> Result<String, AppError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| bad_request(message))
}

fn streaming_response<S>(stream: S) -> Response
where
    S: Stream<Item = String> + Send + 'static,
{
    let body = Body::from_stream(stream.map(Ok::<_, Infallible>));
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header("X-Accel-Buffering", "no")
        .body(body)
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

// ============ Handlers ============

async fn handle_upload(
    State(ctx): State<AppState>,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    let mut user_id = None;
    let mut files = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(format!("invalid multipart body: {}", e)))?
    {
        match field.name() {
            Some("user_id") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| bad_request(format!("invalid user_id field: {}", e)))?;
                user_id = Some(text);
            }
            Some("files") | Some("file") => {
                let filename = field.file_name().unwrap_or_default().to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| bad_request(format!("failed to read '{}': {}", filename, e)))?;
                files.push(UploadedFile {
                    filename,
                    bytes: bytes.to_vec(),
                });
            }
            _ => {}
        }
    }
    let user_id = required(user_id, "user_id is required")?;
    if files.is_empty() {
        return Err(bad_request("at least one file is required"));
    }
    info!(user = %normalize_user_id(&user_id), files = files.len(), "upload received");

    let events = upload_events(ctx, user_id, files).map(|event| event.to_sse());
    Ok(streaming_response(events))
}

#[derive(Deserialize)]
struct AskForm {
    query: Option<String>,
    user_id: Option<String>,
    document_names: Option<String>,
}

async fn handle_ask(
    State(ctx): State<AppState>,
    Form(form): Form<AskForm>,
) -> Result<Response, AppError> {
    let query = required(form.query, "query is required")?;
    let user_id = required(form.user_id, "user_id is required")?;
    let document_names = form.document_names.filter(|d| !d.trim().is_empty());
    Ok(streaming_response(answer_events(ctx, query, user_id, document_names)))
}

#[derive(Deserialize)]
struct UserParams {
    user_id: Option<String>,
}

async fn handle_user_exists(
    State(ctx): State<AppState>,
    Query(params): Query<UserParams>,
) -> Result<Response, AppError> {
    let user_id = required(params.user_id, "user_id is required")?;
    let handles = ctx.coordinator.names(&user_id);
    if !ctx.docs.collection_exists(&handles.collection).await? {
        return Ok(Json(Vec::<serde_json::Value>::new()).into_response());
    }
    let documents = ctx.docs.list_all(&handles.collection).await?;
    info!(user = %handles.user_id, documents = documents.len(), "listed documents");
    Ok(Json(documents).into_response())
}

#[derive(Deserialize)]
struct DeleteParams {
    user_id: Option<String>,
    filename: Option<String>,
}

async fn handle_delete(
    State(ctx): State<AppState>,
    Query(params): Query<DeleteParams>,
) -> Result<Response, AppError> {
    let user_id = required(params.user_id, "user_id is required")?;
    let filename = required(params.filename, "Filename is required")?;
    let report = ctx.pipeline.delete(&user_id, &filename).await;
    if let Some(errors) = &report.errors {
        warn!(user = %report.user_id, filename = %report.normalized_filename, errors = ?errors, "deletion incomplete");
    }
    Ok(Json(report).into_response())
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[derive(Serialize)]
struct LlmHealth {
    reachable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

async fn handle_llm_health(State(ctx): State<AppState>) -> Response {
    let (status, body) = match ctx.llm_health().await {
        None | Some(Ok(())) => (
            StatusCode::OK,
            LlmHealth {
                reachable: true,
                error: None,
            },
        ),
        Some(Err(e)) => (
            StatusCode::SERVICE_UNAVAILABLE,
            LlmHealth {
                reachable: false,
                error: Some(e.to_string()),
            },
        ),
    };
    (status, Json(body)).into_response()
}
