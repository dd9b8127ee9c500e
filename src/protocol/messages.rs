use std::fmt;

use crate::audio::PlaybackMode;

const UPLOAD_PREFIX: &str = "upload:";
const PRESET_PREFIX: &str = "preset:";

/// Inbound control message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    GetResponse,
    GetSilence,
    StartRecording,
    StopRecording,
    Upload(UploadCommand),
    /// Voice preset for later syntheses; an empty name restores the default
    Preset(String),
    Unknown(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadCommand {
    Start,
    Chunk(String),
    Done,
}

impl Command {
    pub fn parse(message: &str) -> Self {
        match message {
            "get_response" => Command::GetResponse,
            "get_silence" => Command::GetSilence,
            "start_recording" => Command::StartRecording,
            "stop_recording" => Command::StopRecording,
            _ => {
                if let Some(rest) = message.strip_prefix(UPLOAD_PREFIX) {
                    let upload = match rest {
                        "START" => UploadCommand::Start,
                        "DONE" => UploadCommand::Done,
                        chunk => UploadCommand::Chunk(chunk.to_string()),
                    };
                    Command::Upload(upload)
                } else if let Some(name) = message.strip_prefix(PRESET_PREFIX) {
                    Command::Preset(name.to_string())
                } else {
                    Command::Unknown(message.to_string())
                }
            }
        }
    }
}

/// Outbound control message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundMessage {
    /// Transcription of the user's recording
    Human(String),
    /// Reply text, or an error report
    Ai(String),
    Playing(PlaybackMode),
    /// One media reference from a tool result
    Image(String),
    Log(String),
    /// Upload pipeline finished for the named file
    Uploaded(String),
}

impl fmt::Display for OutboundMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutboundMessage::Human(text) => write!(f, "Human: {}", text),
            OutboundMessage::Ai(text) => write!(f, "AI: {}", text),
            OutboundMessage::Playing(mode) => write!(f, "playing: {}", mode),
            OutboundMessage::Image(url) => write!(f, "image: {}", url),
            OutboundMessage::Log(text) => write!(f, "log: {}", text),
            OutboundMessage::Uploaded(filename) => write!(f, "uploaded: {} processed", filename),
        }
    }
}
