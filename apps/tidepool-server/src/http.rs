use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde_json::json;
use tidepool_core::{
    CloseSessionResponse, CreateSessionRequest, ProjectId, Session, SessionId, SessionListResponse,
};

use crate::error::ServerError;
use crate::AppState;

pub async fn health_handler() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match &state.metrics {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

pub async fn create_session(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateSessionRequest>,
) -> Result<Json<Session>, ServerError> {
    let session = state.sessions.create(&request.project_id, &request.name)?;
    Ok(Json(session))
}

/// The first listed session doubles as the project's active one.
pub async fn list_sessions(
    State(state): State<Arc<AppState>>,
    Path(project_id): Path<String>,
) -> Json<SessionListResponse> {
    let sessions = state.sessions.list(&ProjectId::from(project_id));
    let active_session_id = sessions.first().map(|session| session.id.clone());
    Json(SessionListResponse {
        sessions,
        active_session_id,
    })
}

/// Always 200 so that closing twice is harmless.
pub async fn remove_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Json<CloseSessionResponse> {
    let removed = state.sessions.remove(&SessionId::from(session_id));
    Json(CloseSessionResponse { removed })
}

pub async fn clear_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<StatusCode, ServerError> {
    state.sessions.clear(&SessionId::from(session_id))?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn stop_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<Json<Session>, ServerError> {
    Ok(Json(state.sessions.stop(&SessionId::from(session_id))?))
}

pub async fn kill_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<Json<Session>, ServerError> {
    Ok(Json(state.sessions.kill(&SessionId::from(session_id))?))
}
