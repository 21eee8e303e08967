//! HTTP surface of a language backend.

use axum::extract::{Path, State};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use omnirepl_http::create_sse_response;
use omnirepl_types::{BackendHealth, CodeRequest, ExecuteResponse, MessageResponse};
use std::time::Duration;

use crate::error::Result;
use crate::service::Backend;

#[derive(Clone)]
pub struct AppState {
    pub backend: Backend,
    pub sse_keepalive: Duration,
}

impl AppState {
    pub fn new(backend: Backend, sse_keepalive: Duration) -> Self {
        Self {
            backend,
            sse_keepalive,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/execute/{session_id}", post(execute_handler))
        .route("/execute-stream/{session_id}", post(execute_stream_handler))
        .route("/reset/{session_id}", post(reset_handler))
        .with_state(state)
}

async fn health_handler(State(state): State<AppState>) -> Json<BackendHealth> {
    Json(state.backend.health())
}

async fn execute_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(request): Json<CodeRequest>,
) -> Result<Json<ExecuteResponse>> {
    Ok(Json(state.backend.execute(&session_id, request.code).await?))
}

async fn execute_stream_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(request): Json<CodeRequest>,
) -> Result<Response> {
    let events = state.backend.execute_stream(session_id, request.code)?;
    Ok(create_sse_response(events, state.sse_keepalive))
}

async fn reset_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<MessageResponse>> {
    Ok(Json(state.backend.reset(&session_id).await?))
}
