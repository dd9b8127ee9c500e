use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::audio::PlaybackMode;

/// Connection-level state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Created,
    Connected,
    Failed,
    Closed,
}

/// Snapshot of a session, published after every state change
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStats {
    pub session_id: String,

    pub connection_state: ConnectionState,

    /// Whether recording is currently active
    pub is_recording: bool,

    /// When the session was created
    pub created_at: DateTime<Utc>,

    /// Number of turns in the conversation history
    pub history_len: usize,

    /// Background tasks launched by this session
    pub tasks_dispatched: usize,

    /// Mode of the outbound track's current source
    pub playback_mode: Option<PlaybackMode>,

    pub voice_preset: Option<String>,

    /// Whether an upload is in progress
    pub upload_in_progress: bool,
}
