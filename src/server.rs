//! HTTP gateway in front of OpenAI.
//!
//! Browsers and the `kbchat` CLI talk to this server instead of OpenAI, so
//! the API key never leaves the host running it.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST`   | `/api/chat` | One conversation turn, optionally scoped to a vector store |
//! | `PUT`    | `/api/chat` | Upload a file (multipart field `file`) and index it |
//! | `DELETE` | `/api/chat` | Detach a file from its vector store and delete it |
//! | `GET`    | `/health`   | Health check (returns version) |
//!
//! # Error Contract
//!
//! Every error is a flat JSON object with a human-readable message:
//!
//! ```json
//! { "error": "No file provided." }
//! ```
//!
//! Upstream OpenAI failures keep their HTTP status; validation failures are
//! `400`; anything else is `500`. `DELETE` errors also echo `fileId`.

use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::error::IndexError;
use crate::index::DocumentIndex;
use crate::models::{DeleteRequest, DeleteResponse, TurnReply, TurnRequest, UploadResponse};
use crate::openai::{extract_text, OpenAIClient};

/// Multipart framing overhead allowed on top of the largest accepted file.
const BODY_LIMIT_SLACK: usize = 1024 * 1024;

/// Shared state for all request handlers.
#[derive(Clone)]
struct AppState {
    /// The one upstream client; holds the API key.
    openai: Arc<OpenAIClient>,
}

/// Starts the gateway on `[server].bind` and runs until the process ends.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let openai = Arc::new(OpenAIClient::from_config(config)?);
    let app = router(openai, config.upload.max_size_bytes as usize);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!(
        addr = %listener.local_addr()?,
        vector_store = %config.openai.vector_store_name,
        model = %config.openai.model,
        "gateway listening"
    );
    println!("Gateway listening on http://{}", config.server.bind);

    axum::serve(listener, app).await?;
    Ok(())
}

/// Builds the gateway routes around an OpenAI client.
///
/// `max_upload_bytes` bounds the largest file `PUT /api/chat` will read.
pub fn router(openai: Arc<OpenAIClient>, max_upload_bytes: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route(
            "/api/chat",
            post(handle_turn).put(handle_upload).delete(handle_delete),
        )
        .route("/health", get(handle_health))
        .layer(DefaultBodyLimit::max(
            max_upload_bytes.saturating_add(BODY_LIMIT_SLACK),
        ))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(AppState { openai })
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    #[serde(rename = "fileId", skip_serializing_if = "Option::is_none")]
    file_id: Option<String>,
}

#[derive(Debug)]
struct AppError {
    status: StatusCode,
    message: String,
    file_id: Option<String>,
}

impl AppError {
    fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            message: message.into(),
            file_id: None,
        }
    }

    fn with_file_id(mut self, file_id: &str) -> Self {
        self.file_id = Some(file_id.to_string());
        self
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.message,
            file_id: self.file_id,
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError::new(400, message)
}

/// Relays an upstream failure. API errors keep their status and message;
/// everything else becomes a 500 with `fallback` unless `fallback` is
/// `None`, in which case the error text itself is used.
fn upstream_error(err: IndexError, fallback: Option<&str>) -> AppError {
    match err {
        IndexError::Api { status, message } => AppError::new(status, message),
        IndexError::Validation(message) => bad_request(message),
        other => AppError::new(
            500,
            fallback
                .map(str::to_string)
                .unwrap_or_else(|| other.to_string()),
        ),
    }
}

// ============ GET /health ============

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

// ============ POST /api/chat ============

/// One turn. Only the newest message is forwarded; the conversation so far
/// is referenced through `previousResponseId`.
async fn handle_turn(
    State(state): State<AppState>,
    body: Result<Json<TurnRequest>, JsonRejection>,
) -> Result<Json<TurnReply>, AppError> {
    let Json(request) = body.map_err(|e| bad_request(e.body_text()))?;

    let params = state
        .openai
        .response_params(&request)
        .map_err(|e| upstream_error(e, None))?;

    let response = state.openai.create_response(&params).await.map_err(|e| {
        tracing::warn!(error = %e, "turn failed");
        upstream_error(
            e,
            Some("An error occurred while processing your request with the Responses API."),
        )
    })?;

    Ok(Json(TurnReply {
        response: extract_text(&response),
        response_id: Some(response.id),
    }))
}

// ============ PUT /api/chat ============

async fn handle_upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    let mut file: Option<(String, Vec<u8>)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(format!("Multipart error: {}", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let name = field.file_name().unwrap_or("upload").to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| bad_request(format!("Read error: {}", e)))?;
        file = Some((name, bytes.to_vec()));
    }

    let (name, bytes) = file.ok_or_else(|| bad_request("No file provided."))?;

    let uploaded = state
        .openai
        .upload_and_index(&name, bytes)
        .await
        .map_err(|e| {
            tracing::warn!(file = %name, error = %e, "upload failed");
            upstream_error(e, None)
        })?;

    let store_name = &state.openai.settings().vector_store_name;
    Ok(Json(UploadResponse {
        success: true,
        message: format!(
            "File \"{}\" uploaded and added to vector store \"{}\".",
            uploaded.file_name, store_name
        ),
        file: uploaded,
    }))
}

// ============ DELETE /api/chat ============

/// Detaches then deletes. A file that is already gone at either step
/// counts as removed.
async fn handle_delete(
    State(state): State<AppState>,
    body: Result<Json<DeleteRequest>, JsonRejection>,
) -> Result<Json<DeleteResponse>, AppError> {
    let Json(request) = body.map_err(|e| bad_request(e.body_text()))?;

    let (file_id, vector_store_id) = match (request.file_id, request.vector_store_id) {
        (Some(f), Some(v)) if !f.is_empty() && !v.is_empty() => (f, v),
        _ => return Err(bad_request("Missing fileId or vectorStoreId.")),
    };

    if let Err(e) = state
        .openai
        .remove_file_from_store(&vector_store_id, &file_id)
        .await
    {
        tracing::warn!(%file_id, error = %e, "delete failed");
        let prefix = format!("Failed to delete file {}.", file_id);
        let err = match e {
            IndexError::Api { status, message } => {
                AppError::new(status, format!("{} OpenAI Error: {}", prefix, message))
            }
            other => AppError::new(500, format!("{} Error: {}", prefix, other)),
        };
        return Err(err.with_file_id(&file_id));
    }

    Ok(Json(DeleteResponse {
        success: true,
        message: format!(
            "File {} successfully processed for deletion from vector store and OpenAI storage.",
            file_id
        ),
    }))
}
