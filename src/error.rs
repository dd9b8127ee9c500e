use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// External pipeline stage that produced a [`SessionError::Collaborator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Transcription,
    Reasoning,
    Synthesis,
    ImageDescription,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Transcription => "transcription",
            Stage::Reasoning => "reasoning",
            Stage::Synthesis => "synthesis",
            Stage::ImageDescription => "image description",
        };
        f.write_str(name)
    }
}

/// Errors a session reports to its client.
///
/// Only [`SessionError::Transport`] ends a session; everything else is
/// announced on the control channel and the session keeps running.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no synthesized reply available at {}", path.display())]
    NoReplyAvailable { path: PathBuf },

    #[error("upload protocol error: {0}")]
    UploadProtocol(String),

    #[error("{stage} failed: {source}")]
    Collaborator {
        stage: Stage,
        #[source]
        source: BoxError,
    },

    #[error("transport failure: {0}")]
    Transport(String),
}

impl SessionError {
    pub fn collaborator(stage: Stage, err: anyhow::Error) -> Self {
        SessionError::Collaborator {
            stage,
            source: err.into(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionError::Transport(_))
    }
}
