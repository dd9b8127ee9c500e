//! HTTP API server
//!
//! - GET /connect - Upgrade to a WebSocket voice session
//! - GET /sessions - List live sessions
//! - GET /sessions/:id - Query session status
//! - DELETE /sessions/:id - Close a session
//! - GET /health - Health check

mod handlers;
mod routes;
mod state;

pub use routes::create_router;
pub use state::AppState;
