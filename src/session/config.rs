use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::config::Config;

/// Configuration for a voice session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Unique session identifier
    pub session_id: String,

    /// Where this session's synthesized reply is written (overwritten per reply)
    pub reply_path: PathBuf,

    /// Inbound PCM format
    pub input_sample_rate: u32,
    pub input_channels: u16,

    /// Longest recording kept in the capture buffer
    pub max_recording: Duration,

    /// Length of one silence run on the outbound track
    pub silence_clip: Duration,
    pub silence_sample_rate: u32,

    /// Bounded wait for one frame from the active playback source
    pub source_timeout: Duration,

    /// Maximum history length in turns (0 = unbounded)
    pub history_limit: usize,

    /// Append list-shaped tool results to history
    pub tool_results_in_history: bool,

    pub default_voice_preset: Option<String>,
}

impl SessionConfig {
    /// Session settings from the service config, with a fresh session ID.
    pub fn from_config(cfg: &Config) -> Self {
        let session_id = format!("session-{}", uuid::Uuid::new_v4());
        let reply_path = cfg.session.replies_dir.join(format!("{}.wav", session_id));

        Self {
            session_id,
            reply_path,
            input_sample_rate: cfg.audio.input_sample_rate,
            input_channels: cfg.audio.input_channels,
            max_recording: Duration::from_secs(cfg.audio.max_recording_secs),
            silence_clip: Duration::from_millis(cfg.audio.silence_clip_ms),
            silence_sample_rate: cfg.audio.silence_sample_rate,
            source_timeout: Duration::from_millis(cfg.audio.source_timeout_ms),
            history_limit: cfg.session.history_limit,
            tool_results_in_history: cfg.session.tool_results_in_history,
            default_voice_preset: cfg.session.default_voice_preset.clone(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}
