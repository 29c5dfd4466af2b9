//! HTTP API server for integration with other systems.
//!
//! Accepts flashcard requests, reports job state and serves finished
//! flashcard sets. Every request is scoped to the owner named in the
//! `x-owner-id` header.

use crate::cli::preflight::{self, Operation};
use crate::cli::Output;
use crate::config::Settings;
use crate::error::{ErrorKind, JottaError};
use crate::flashcards::FlashcardSet;
use crate::orchestrator::Orchestrator;
use crate::queue::Job;
use axum::{
    extract::{FromRequestParts, Path, State},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

const OWNER_HEADER: &str = "x-owner-id";

/// Shared application state.
struct AppState {
    orchestrator: Orchestrator,
}

/// Run the HTTP API server.
pub async fn run_serve(
    host: Option<String>,
    port: Option<u16>,
    no_workers: bool,
    settings: Settings,
) -> anyhow::Result<()> {
    let host = host.unwrap_or_else(|| settings.server.host.clone());
    let port = port.unwrap_or(settings.server.port);

    let orchestrator = if no_workers {
        Orchestrator::new(settings)?
    } else {
        preflight::check(Operation::Process, &settings)?;
        Orchestrator::with_workers(settings)?
    };
    if !no_workers {
        orchestrator.start_workers()?;
    }

    let state = Arc::new(AppState { orchestrator });
    let app = router(state.clone());

    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    Output::header("Jotta API Server");
    println!();
    Output::success(&format!("Listening on http://{}", addr));
    if no_workers {
        Output::info("Workers disabled; run `jotta worker` to process jobs.");
    }
    println!();
    println!("Endpoints (send the owner in the {} header):", OWNER_HEADER);
    Output::kv("Health", "GET    /health");
    Output::kv("Submit", "POST   /flashcards");
    Output::kv("List", "GET    /flashcards");
    Output::kv("Get", "GET    /flashcards/:subject_ref");
    Output::kv("Delete", "DELETE /flashcards/:subject_ref");
    Output::kv("Job status", "GET    /jobs/:id");
    Output::kv("Cancel job", "POST   /jobs/:id/cancel");
    println!();
    Output::info("Press Ctrl+C to stop the server.");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    info!("Server stopped, releasing running jobs");
    state.orchestrator.shutdown().await;

    Ok(())
}

fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/flashcards", post(submit).get(list_flashcards))
        .route(
            "/flashcards/{subject_ref}",
            get(get_flashcards).delete(delete_flashcards),
        )
        .route("/jobs/{id}", get(job_status))
        .route("/jobs/{id}/cancel", post(cancel_job))
        .layer(cors)
        .with_state(state)
}

// === Request/Response Types ===

#[derive(Deserialize)]
struct SubmitRequest {
    /// YouTube URL or video ID
    subject_ref: String,
}

#[derive(Serialize)]
struct FlashcardListResponse {
    flashcard_sets: Vec<FlashcardSet>,
    total: usize,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    kind: ErrorKind,
}

/// Library error rendered as a JSON response.
struct ApiError(JottaError);

impl From<JottaError> for ApiError {
    fn from(e: JottaError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.0.kind();
        let status = status_for(kind);
        if status.is_server_error() {
            error!(error = %self.0, "Request failed");
        }
        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
                kind,
            }),
        )
            .into_response()
    }
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::Duplicate | ErrorKind::Cancelled => StatusCode::CONFLICT,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::TransientExternal | ErrorKind::PermanentExternal => StatusCode::BAD_GATEWAY,
        ErrorKind::Resource | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Caller identity from the `x-owner-id` header.
struct Owner(String);

impl<S: Send + Sync> FromRequestParts<S> for Owner {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(OWNER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| Owner(v.to_string()))
            .ok_or_else(|| {
                ApiError(JottaError::InvalidInput(format!(
                    "missing {} header",
                    OWNER_HEADER
                )))
            })
    }
}

// === Handlers ===

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn submit(
    State(state): State<Arc<AppState>>,
    Owner(owner): Owner,
    Json(req): Json<SubmitRequest>,
) -> Result<(StatusCode, Json<Job>), ApiError> {
    let job = state.orchestrator.submit(&req.subject_ref, &owner).await?;
    Ok((StatusCode::ACCEPTED, Json(job)))
}

async fn list_flashcards(
    State(state): State<Arc<AppState>>,
    Owner(owner): Owner,
) -> Result<Json<FlashcardListResponse>, ApiError> {
    let flashcard_sets = state.orchestrator.list_results(&owner).await?;
    Ok(Json(FlashcardListResponse {
        total: flashcard_sets.len(),
        flashcard_sets,
    }))
}

async fn get_flashcards(
    State(state): State<Arc<AppState>>,
    Owner(owner): Owner,
    Path(subject_ref): Path<String>,
) -> Result<Json<FlashcardSet>, ApiError> {
    Ok(Json(state.orchestrator.get_result(&subject_ref, &owner).await?))
}

async fn delete_flashcards(
    State(state): State<Arc<AppState>>,
    Owner(owner): Owner,
    Path(subject_ref): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.orchestrator.delete_result(&subject_ref, &owner).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Jobs of other owners are reported as missing.
async fn owned_job(state: &AppState, job_id: &str, owner: &str) -> Result<Job, ApiError> {
    let job = state.orchestrator.job_status(job_id).await?;
    if job.payload.owner_id() != owner {
        return Err(ApiError(JottaError::NotFound(format!("job {}", job_id))));
    }
    Ok(job)
}

async fn job_status(
    State(state): State<Arc<AppState>>,
    Owner(owner): Owner,
    Path(id): Path<String>,
) -> Result<Json<Job>, ApiError> {
    Ok(Json(owned_job(&state, &id, &owner).await?))
}

async fn cancel_job(
    State(state): State<Arc<AppState>>,
    Owner(owner): Owner,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let job = owned_job(&state, &id, &owner).await?;
    state.orchestrator.cancel_job(&job.id).await?;
    Ok(StatusCode::ACCEPTED)
}
