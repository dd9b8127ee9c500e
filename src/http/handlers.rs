use super::state::AppState;
use crate::session::SessionStats;
use crate::transport::websocket::serve_socket;
use axum::{
    extract::{ws::WebSocketUpgrade, Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::Serialize;
use tracing::{info, warn};

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct CloseSessionResponse {
    pub session_id: String,
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn not_found(session_id: &str) -> axum::response::Response {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse {
            error: format!("Session {} not found", session_id),
        }),
    )
        .into_response()
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /connect
/// Upgrade to a WebSocket and start a new voice session on it
pub async fn connect(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    info!("Incoming voice connection");
    ws.on_upgrade(move |socket| serve_socket(socket, state.manager))
}

/// GET /sessions
/// Live sessions, oldest first
pub async fn list_sessions(State(state): State<AppState>) -> Json<Vec<SessionStats>> {
    Json(state.manager.list().await)
}

/// GET /sessions/:session_id
pub async fn get_session_status(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    match state.manager.get(&session_id).await {
        Some(stats) => (StatusCode::OK, Json(stats)).into_response(),
        None => not_found(&session_id),
    }
}

/// DELETE /sessions/:session_id
/// Close a session and delete its reply file
pub async fn close_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    if state.manager.close(&session_id).await {
        info!("Session {} closed via API", session_id);
        (
            StatusCode::OK,
            Json(CloseSessionResponse {
                session_id,
                status: "closed".to_string(),
            }),
        )
            .into_response()
    } else {
        warn!("Session {} not found", session_id);
        not_found(&session_id)
    }
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
