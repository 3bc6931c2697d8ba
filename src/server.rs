//! HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/chat` | Answer a message with vault context |
//! | `POST` | `/search` | Passage search |
//! | `GET`  | `/documents` | Indexed documents |
//! | `GET`  | `/health` | Index readiness |
//! | `POST` | `/reindex` | Run a reconciliation pass |
//! | `GET`  | `/models` | Configured embedding and generation models |
//! | `GET`  | `/sessions/{id}` | Recent turns of a session |
//! | `DELETE` | `/sessions/{id}` | Forget a session |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "message must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `retrieval_unavailable` (503),
//! `internal` (500). A chat request never fails because retrieval or
//! generation is down; those show up in the reply's `degraded` list.

use std::future::Future;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use vault_context_core::search::SearchMode;

use crate::chat::ChatRequest;
use crate::engine::Vault;

#[derive(Clone)]
struct AppState {
    vault: Arc<Vault>,
}

/// Build the router without binding a socket.
pub fn router(vault: Arc<Vault>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/chat", post(handle_chat))
        .route("/search", post(handle_search))
        .route("/documents", get(handle_documents))
        .route("/health", get(handle_health))
        .route("/reindex", post(handle_reindex))
        .route("/models", get(handle_models))
        .route(
            "/sessions/{id}",
            get(handle_session).delete(handle_clear_session),
        )
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(AppState { vault })
}

/// Serve until `shutdown` resolves.
pub async fn run_server<F>(vault: Arc<Vault>, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let bind_addr = vault.config.server.bind.clone();
    let app = router(vault);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "listening");
    axum::serve(listener, app)
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

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
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

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

fn unavailable(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::SERVICE_UNAVAILABLE,
        code: "retrieval_unavailable",
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal",
        message: message.into(),
    }
}

// ============ Handlers ============

async fn handle_chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Response, AppError> {
    if request.message.trim().is_empty() {
        return Err(bad_request("message must not be empty"));
    }
    let reply = state.vault.chat.ask(request).await;
    Ok(Json(reply).into_response())
}

#[derive(Deserialize)]
struct SearchRequest {
    query: String,
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    mode: Option<SearchMode>,
}

#[derive(Serialize)]
struct SearchResponse<T: Serialize> {
    results: Vec<T>,
    total: usize,
}

async fn handle_search(
    State(state): State<AppState>,
    Json(request): Json<SearchRequest>,
) -> Result<Response, AppError> {
    if request.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }
    let results = state
        .vault
        .chat
        .search(&request.query, request.limit, request.mode)
        .await
        .map_err(|e| unavailable(e.to_string()))?;
    let total = results.len();
    Ok(Json(SearchResponse { results, total }).into_response())
}

async fn handle_documents(State(state): State<AppState>) -> Result<Response, AppError> {
    let documents = state
        .vault
        .chat
        .documents()
        .await
        .map_err(|e| unavailable(e.to_string()))?;
    let total = documents.len();
    Ok(Json(SearchResponse {
        results: documents,
        total,
    })
    .into_response())
}

async fn handle_health(State(state): State<AppState>) -> Response {
    let health = state.vault.chat.health().await;
    let status = if health.error.is_some() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (status, Json(health)).into_response()
}

async fn handle_reindex(State(state): State<AppState>) -> Result<Response, AppError> {
    let report = state
        .vault
        .coordinator
        .reconcile()
        .await
        .map_err(|e| internal(format!("{:#}", e)))?;
    Ok(Json(report).into_response())
}

#[derive(Serialize)]
struct ModelsResponse {
    embedding: String,
    dims: usize,
    generation: String,
}

async fn handle_models(State(state): State<AppState>) -> Json<ModelsResponse> {
    Json(ModelsResponse {
        embedding: state.vault.embedder.model_name().to_string(),
        dims: state.vault.embedder.dims(),
        generation: state.vault.generator.model_name().to_string(),
    })
}

#[derive(Deserialize)]
struct SessionQuery {
    #[serde(default)]
    limit: Option<usize>,
}

async fn handle_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<SessionQuery>,
) -> Response {
    let limit = query
        .limit
        .unwrap_or(state.vault.config.conversation.max_turns_per_session);
    let turns = state.vault.chat.session(&id, limit);
    let total = turns.len();
    Json(SearchResponse {
        results: turns,
        total,
    })
    .into_response()
}

async fn handle_clear_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> StatusCode {
    state.vault.chat.clear_session(&id);
    StatusCode::NO_CONTENT
}
