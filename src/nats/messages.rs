use serde::{Deserialize, Serialize};

use crate::pipeline::Turn;

/// Reply envelope shared by all collaborator services
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ServiceReply<T> {
    Failure { error: String },
    Success(T),
}

impl<T> ServiceReply<T> {
    pub fn into_result(self) -> Result<T, String> {
        match self {
            ServiceReply::Failure { error } => Err(error),
            ServiceReply::Success(value) => Ok(value),
        }
    }
}

/// Request sent to the speech-to-text service
#[derive(Debug, Serialize, Deserialize)]
pub struct TranscribeRequest {
    pub session_id: String,
    pub audio: String, // Base64-encoded WAV
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TranscribeReply {
    pub text: String,
}

/// Request sent to the reasoning agent; the reply is an `AssistantTurn`
#[derive(Debug, Serialize, Deserialize)]
pub struct ReasonRequest {
    pub session_id: String,
    pub history: Vec<Turn>,
    pub request: Turn,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SynthesizeRequest {
    pub session_id: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice_preset: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SynthesizeReply {
    pub audio: String, // Base64-encoded audio file
    #[serde(default = "default_audio_format")]
    pub format: String,
}

fn default_audio_format() -> String {
    "wav".to_string()
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DescribeImageRequest {
    pub session_id: String,
    pub filename: String,
    pub mime_type: String,
    /// `data:<mime>;base64,<data>`
    pub image_url: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DescribeImageReply {
    pub record_id: String,
}
