//! External collaborators of a voice session
//!
//! Transcription, reasoning, synthesis and image description are black
//! boxes behind these traits. The production implementations talk to
//! remote services over NATS (see [`crate::nats::services`]).

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

use crate::protocol::UploadedImage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Human,
    Assistant,
}

/// One conversational turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    pub fn human(content: impl Into<String>) -> Self {
        Self {
            role: Role::Human,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Payload of a tool invocation result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolPayload {
    /// References to media (e.g. image URLs), announced one by one
    Media(Vec<String>),
    /// Text to be spoken like a plain reply
    Text(String),
}

/// Final turn produced by the reasoning collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AssistantTurn {
    Reply { text: String },
    ToolResult { tool: String, payload: ToolPayload },
}

impl AssistantTurn {
    /// Text to synthesize, or `None` for list-shaped tool results.
    pub fn spoken_text(&self) -> Option<&str> {
        match self {
            AssistantTurn::Reply { text } => Some(text),
            AssistantTurn::ToolResult {
                payload: ToolPayload::Text(text),
                ..
            } => Some(text),
            AssistantTurn::ToolResult {
                payload: ToolPayload::Media(_),
                ..
            } => None,
        }
    }

    pub fn is_list_shaped(&self) -> bool {
        self.spoken_text().is_none()
    }

    /// History representation of this turn.
    pub fn to_turn(&self) -> Turn {
        match self {
            AssistantTurn::ToolResult {
                payload: ToolPayload::Media(refs),
                ..
            } => Turn::assistant(serde_json::to_string(refs).unwrap_or_default()),
            other => Turn::assistant(other.spoken_text().unwrap_or_default()),
        }
    }
}

#[async_trait::async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe a WAV byte stream.
    async fn transcribe(&self, session_id: &str, wav: &[u8]) -> Result<String>;
}

#[async_trait::async_trait]
pub trait Reasoner: Send + Sync {
    /// Produce the assistant's final turn for `request` given prior `history`.
    async fn respond(&self, session_id: &str, history: &[Turn], request: &Turn) -> Result<AssistantTurn>;
}

#[async_trait::async_trait]
pub trait Synthesizer: Send + Sync {
    /// Synthesize `text` and write the audio file to `output`.
    async fn synthesize(
        &self,
        session_id: &str,
        text: &str,
        voice_preset: Option<&str>,
        output: &Path,
    ) -> Result<()>;
}

#[async_trait::async_trait]
pub trait ImageDescriber: Send + Sync {
    /// Describe an uploaded image and persist the structured record.
    async fn describe_and_store(&self, session_id: &str, image: &UploadedImage) -> Result<()>;
}

/// The full set of collaborators shared by all sessions
#[derive(Clone)]
pub struct Pipeline {
    pub transcriber: Arc<dyn Transcriber>,
    pub reasoner: Arc<dyn Reasoner>,
    pub synthesizer: Arc<dyn Synthesizer>,
    pub image_describer: Arc<dyn ImageDescriber>,
}
