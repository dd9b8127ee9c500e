//! Voice session management
//!
//! A `Session` is the per-connection aggregate: capture buffer, playback
//! multiplexer, upload reassembler and conversation history, driven by a
//! single control lane. `SessionManager` is the registry of live sessions.

mod config;
mod manager;
mod session;
mod stats;

pub use config::SessionConfig;
pub use manager::SessionManager;
pub use session::Session;
pub use stats::{ConnectionState, SessionStats};
