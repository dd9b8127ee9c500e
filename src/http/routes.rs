use super::handlers;
use super::state::AppState;
use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Voice sessions
        .route("/connect", get(handlers::connect))
        .route("/sessions", get(handlers::list_sessions))
        .route(
            "/sessions/:session_id",
            get(handlers::get_session_status).delete(handlers::close_session),
        )
        // Add tracing middleware for request logging
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
