//! JSON HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`    | `/api/documents?status_filter=` | Tracked documents and status counts |
//! | `GET`    | `/api/documents/{filename}` | One document with its on-disk content |
//! | `POST`   | `/api/documents/sync` | Diff the document root against the store |
//! | `DELETE` | `/api/documents/cleanup` | Drop documents marked deleted |
//! | `POST`   | `/api/reindex/selective` | Chunk and embed the named (or pending) documents |
//! | `POST`   | `/api/chat` | Answer a question within a conversation |
//! | `DELETE` | `/api/chat/{conversation_id}` | Forget a conversation |
//! | `GET`    | `/api/health` | Liveness and provider summary |
//! | `GET`    | `/api/stats` | Chunk totals per file |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_found", "message": "document not found: a.md" } }
//! ```
//!
//! Codes: `bad_request` (400), `not_found` (404), `external_service` (502),
//! `configuration` (500), `internal` (500).

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use mdrag_core::models::DocumentStatus;
use mdrag_core::store::ChunkStats;

use crate::assistant::{ChatRequest, ChatResponse};
use crate::documents::{DocumentDetail, DocumentList};
use crate::engine::{Engine, HealthReport};
use crate::error::RagError;
use crate::index::{CleanupReport, ReindexReport};
use crate::sync::SyncReport;

#[derive(Clone)]
struct AppState {
    engine: Arc<Engine>,
}

/// Build the API router. Exposed separately from [`run_server`] so it can be
/// driven in-process.
pub fn router(engine: Arc<Engine>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/documents", get(handle_list_documents))
        .route("/api/documents/sync", post(handle_sync))
        .route("/api/documents/cleanup", delete(handle_cleanup))
        .route("/api/documents/{*filename}", get(handle_get_document))
        .route("/api/reindex/selective", post(handle_reindex))
        .route("/api/chat", post(handle_chat))
        .route("/api/chat/{conversation_id}", delete(handle_clear_chat))
        .route("/api/health", get(handle_health))
        .route("/api/stats", get(handle_stats))
        .layer(cors)
        .with_state(AppState { engine })
}

/// Serve the API on `bind` until the process is terminated.
pub async fn run_server(engine: Arc<Engine>, bind: &str) -> anyhow::Result<()> {
    let app = router(engine);
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(bind, "HTTP server listening");
    println!("mdrag server listening on http://{}", bind);
    axum::serve(listener, app).await?;
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

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl From<RagError> for AppError {
    fn from(err: RagError) -> Self {
        let status = match &err {
            RagError::NotFound(_) => StatusCode::NOT_FOUND,
            RagError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            RagError::ExternalService(_) => StatusCode::BAD_GATEWAY,
            RagError::Configuration(_)
            | RagError::Database(_)
            | RagError::Io(_)
            | RagError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(code = err.code(), error = %err, "request failed");
        }
        AppError {
            status,
            code: err.code(),
            message: err.to_string(),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError {
            status: StatusCode::BAD_REQUEST,
            code: "bad_request",
            message: rejection.body_text(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, AppError>;

// ============ Documents ============

#[derive(Deserialize)]
struct ListQuery {
    status_filter: Option<String>,
}

async fn handle_list_documents(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<DocumentList> {
    let status = match query.status_filter.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(s) => Some(
            s.parse::<DocumentStatus>()
                .map_err(|e| RagError::invalid(e.to_string()))?,
        ),
    };
    Ok(Json(state.engine.list_documents(status).await?))
}

async fn handle_get_document(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> ApiResult<DocumentDetail> {
    Ok(Json(state.engine.get_document(&filename).await?))
}

async fn handle_sync(State(state): State<AppState>) -> ApiResult<SyncReport> {
    Ok(Json(state.engine.sync().await?))
}

async fn handle_cleanup(State(state): State<AppState>) -> ApiResult<CleanupReport> {
    Ok(Json(state.engine.cleanup_deleted().await?))
}

// ============ Reindex ============

#[derive(Deserialize)]
struct ReindexRequest {
    #[serde(default)]
    filenames: Vec<String>,
}

async fn handle_reindex(
    State(state): State<AppState>,
    body: Result<Json<ReindexRequest>, JsonRejection>,
) -> ApiResult<ReindexReport> {
    let Json(request) = body?;
    Ok(Json(state.engine.reindex_selective(&request.filenames).await?))
}

// ============ Chat ============

async fn handle_chat(
    State(state): State<AppState>,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> ApiResult<ChatResponse> {
    let Json(request) = body?;
    let response = state
        .engine
        .chat(&request.message, request.conversation_id.as_deref())
        .await?;
    Ok(Json(response))
}

#[derive(Serialize)]
struct ClearResponse {
    status: &'static str,
    message: String,
}

async fn handle_clear_chat(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
) -> ApiResult<ClearResponse> {
    state.engine.clear_conversation(&conversation_id).await?;
    Ok(Json(ClearResponse {
        status: "success",
        message: format!("Conversation {} cleared", conversation_id),
    }))
}

// ============ Health & stats ============

async fn handle_health(State(state): State<AppState>) -> Json<HealthReport> {
    Json(state.engine.health().await)
}

async fn handle_stats(State(state): State<AppState>) -> ApiResult<ChunkStats> {
    Ok(Json(state.engine.stats().await?))
}
