//! HTTP trigger surface: run a triage pass, submit a follow-up.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tracing::error;

use crate::error::PipelineError;
use crate::followup::FollowUpService;
use crate::pipeline::runner::TriageRunner;

/// Shared state for the API routes.
#[derive(Clone)]
pub struct ApiState {
    pub runner: Arc<TriageRunner>,
    pub follow_ups: Arc<FollowUpService>,
}

#[derive(Debug, Deserialize)]
pub struct EvaluateRequest {
    pub reply_id: String,
    pub input: String,
}

#[derive(Debug, Serialize)]
pub struct EvaluateResponse {
    pub new_reply_email: String,
}

/// Pipeline error rendered as `{"error": ...}`.
struct ApiError(PipelineError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0 {
            PipelineError::NotFound { .. } => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(kind = self.0.kind(), error = %self.0, "Request failed");
        }
        (status, Json(serde_json::json!({ "error": self.0.to_string() }))).into_response()
    }
}

impl From<PipelineError> for ApiError {
    fn from(e: PipelineError) -> Self {
        Self(e)
    }
}

/// GET /health
async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

/// POST /gpt/process-emails
///
/// Runs one triage pass and returns its summary.
async fn process_emails(State(state): State<ApiState>) -> Result<Response, ApiError> {
    let summary = state.runner.run_once().await?;
    Ok(Json(summary).into_response())
}

/// POST /gpt/evaluate-email
async fn evaluate_email(
    State(state): State<ApiState>,
    Json(request): Json<EvaluateRequest>,
) -> Result<Json<EvaluateResponse>, ApiError> {
    let new_reply_email = state
        .follow_ups
        .submit_follow_up(&request.reply_id, &request.input)
        .await?;
    Ok(Json(EvaluateResponse { new_reply_email }))
}

/// Build the API routes.
pub fn routes(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/gpt/process-emails", post(process_emails))
        .route("/gpt/evaluate-email", post(evaluate_email))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
