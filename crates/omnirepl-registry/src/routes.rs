//! HTTP surface of the session registry.

use axum::body::Bytes;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use omnirepl_types::{
    ActivityQuery, AddHistoryEntryRequest, AdminSessionList, CreateSessionRequest,
    DeleteSessionResponse, EnvironmentResponse, HistoryAppendedResponse, HistoryResponse,
    HistoryUpdatedResponse, MessageResponse, RegistryHealth, RenameSessionRequest,
    RenameSessionResponse, Session, SessionList, UpdateEnvironmentRequest,
    UpdateHistoryEntryRequest,
};

use crate::error::Result;
use crate::gateway::{ExecuteMode, Gateway};
use crate::service::SessionRegistry;

/// Shared state for registry handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: SessionRegistry,
    pub gateway: Gateway,
}

impl AppState {
    pub fn new(registry: SessionRegistry, gateway: Gateway) -> Self {
        Self { registry, gateway }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/sessions", get(list_handler).post(create_handler))
        .route("/admin/sessions", get(admin_list_handler))
        .route("/sessions/{session_id}", get(get_handler).delete(delete_handler))
        .route("/sessions/{session_id}/rename", put(rename_handler))
        .route("/sessions/{session_id}/activity", put(activity_handler))
        .route(
            "/sessions/{session_id}/history",
            get(history_handler)
                .post(append_history_handler)
                .delete(clear_history_handler),
        )
        .route(
            "/sessions/{session_id}/history/{entry_id}",
            put(update_history_entry_handler),
        )
        .route(
            "/sessions/{session_id}/environment",
            get(get_environment_handler)
                .put(put_environment_handler)
                .delete(clear_environment_handler),
        )
        .route("/gateway/execute/{session_id}", post(gateway_execute_handler))
        .route(
            "/gateway/execute-stream/{session_id}",
            post(gateway_execute_stream_handler),
        )
        .with_state(state)
}

async fn health_handler(State(state): State<AppState>) -> (StatusCode, Json<RegistryHealth>) {
    let health = state.registry.health().await;
    let status = if health.error.is_none() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(health))
}

async fn list_handler(State(state): State<AppState>) -> Result<Json<SessionList>> {
    Ok(Json(state.registry.list().await?))
}

async fn admin_list_handler(State(state): State<AppState>) -> Result<Json<AdminSessionList>> {
    Ok(Json(state.registry.admin_list().await?))
}

async fn create_handler(
    State(state): State<AppState>,
    request: std::result::Result<Json<CreateSessionRequest>, JsonRejection>,
) -> Result<Json<Session>> {
    let Json(request) = request?;
    Ok(Json(state.registry.create(request).await?))
}

async fn get_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<Session>> {
    Ok(Json(state.registry.get(&session_id).await?))
}

async fn delete_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<DeleteSessionResponse>> {
    Ok(Json(state.registry.delete(&session_id).await?))
}

async fn rename_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(request): Json<RenameSessionRequest>,
) -> Result<Json<RenameSessionResponse>> {
    Ok(Json(state.registry.rename(&session_id, request.name).await?))
}

async fn activity_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    query: std::result::Result<Query<ActivityQuery>, QueryRejection>,
) -> Result<Json<MessageResponse>> {
    let Query(query) = query?;
    Ok(Json(
        state
            .registry
            .record_activity(&session_id, &query.language)
            .await?,
    ))
}

async fn history_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<HistoryResponse>> {
    Ok(Json(state.registry.get_history(&session_id).await?))
}

async fn append_history_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(request): Json<AddHistoryEntryRequest>,
) -> Result<Json<HistoryAppendedResponse>> {
    Ok(Json(
        state
            .registry
            .append_history(&session_id, request.entry)
            .await?,
    ))
}

async fn update_history_entry_handler(
    State(state): State<AppState>,
    Path((session_id, entry_id)): Path<(String, String)>,
    Json(request): Json<UpdateHistoryEntryRequest>,
) -> Result<Json<HistoryUpdatedResponse>> {
    Ok(Json(
        state
            .registry
            .update_history_entry(&session_id, &entry_id, request.content)
            .await?,
    ))
}

async fn clear_history_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<MessageResponse>> {
    Ok(Json(state.registry.clear_history(&session_id).await?))
}

async fn get_environment_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<EnvironmentResponse>> {
    Ok(Json(state.registry.get_environment(&session_id).await?))
}

async fn put_environment_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    request: std::result::Result<Json<UpdateEnvironmentRequest>, JsonRejection>,
) -> Result<Json<MessageResponse>> {
    let Json(request) = request?;
    Ok(Json(
        state
            .registry
            .put_environment(&session_id, request)
            .await?,
    ))
}

async fn clear_environment_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<MessageResponse>> {
    Ok(Json(state.registry.clear_environment(&session_id).await?))
}

async fn gateway_execute_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    body: Bytes,
) -> Result<Response> {
    state
        .gateway
        .forward(&session_id, ExecuteMode::Buffered, body)
        .await
}

async fn gateway_execute_stream_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    body: Bytes,
) -> Result<Response> {
    state
        .gateway
        .forward(&session_id, ExecuteMode::Streaming, body)
        .await
}
