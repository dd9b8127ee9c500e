//! Collaborator adapters backed by NATS request/reply

use anyhow::{Context, Result};
use base64::Engine;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use super::client::NatsClient;
use super::messages::{
    DescribeImageReply, DescribeImageRequest, ReasonRequest, SynthesizeReply, SynthesizeRequest,
    TranscribeReply, TranscribeRequest,
};
use crate::config::NatsConfig;
use crate::pipeline::{
    AssistantTurn, ImageDescriber, Pipeline, Reasoner, Synthesizer, Transcriber, Turn,
};
use crate::protocol::UploadedImage;

pub struct NatsTranscriber {
    client: NatsClient,
    subject: String,
}

impl NatsTranscriber {
    pub fn new(client: NatsClient, subject: impl Into<String>) -> Self {
        Self {
            client,
            subject: subject.into(),
        }
    }
}

#[async_trait::async_trait]
impl Transcriber for NatsTranscriber {
    async fn transcribe(&self, session_id: &str, wav: &[u8]) -> Result<String> {
        let request = TranscribeRequest {
            session_id: session_id.to_string(),
            audio: base64::engine::general_purpose::STANDARD.encode(wav),
        };

        let reply: TranscribeReply = self.client.request_json(&self.subject, &request).await?;
        Ok(reply.text.trim().to_string())
    }
}

pub struct NatsReasoner {
    client: NatsClient,
    subject: String,
}

impl NatsReasoner {
    pub fn new(client: NatsClient, subject: impl Into<String>) -> Self {
        Self {
            client,
            subject: subject.into(),
        }
    }
}

#[async_trait::async_trait]
impl Reasoner for NatsReasoner {
    async fn respond(&self, session_id: &str, history: &[Turn], request: &Turn) -> Result<AssistantTurn> {
        let request = ReasonRequest {
            session_id: session_id.to_string(),
            history: history.to_vec(),
            request: request.clone(),
        };

        self.client.request_json(&self.subject, &request).await
    }
}

pub struct NatsSynthesizer {
    client: NatsClient,
    subject: String,
}

impl NatsSynthesizer {
    pub fn new(client: NatsClient, subject: impl Into<String>) -> Self {
        Self {
            client,
            subject: subject.into(),
        }
    }
}

#[async_trait::async_trait]
impl Synthesizer for NatsSynthesizer {
    async fn synthesize(
        &self,
        session_id: &str,
        text: &str,
        voice_preset: Option<&str>,
        output: &Path,
    ) -> Result<()> {
        let request = SynthesizeRequest {
            session_id: session_id.to_string(),
            text: text.to_string(),
            voice_preset: voice_preset.map(str::to_string),
        };

        let reply: SynthesizeReply = self.client.request_json(&self.subject, &request).await?;
        let audio = base64::engine::general_purpose::STANDARD
            .decode(&reply.audio)
            .context("Synthesized audio is not valid base64")?;

        write_reply(output, &audio).await?;
        debug!(
            "Wrote {} bytes of {} audio to {}",
            audio.len(),
            reply.format,
            output.display()
        );
        Ok(())
    }
}

/// Write via a sibling temp file so the multiplexer never opens a partial reply.
pub async fn write_reply(output: &Path, audio: &[u8]) -> Result<()> {
    let partial = output.with_extension("part");
    tokio::fs::write(&partial, audio)
        .await
        .with_context(|| format!("Failed to write {}", partial.display()))?;
    tokio::fs::rename(&partial, output)
        .await
        .with_context(|| format!("Failed to move reply into {}", output.display()))?;
    Ok(())
}

pub struct NatsImageDescriber {
    client: NatsClient,
    subject: String,
}

impl NatsImageDescriber {
    pub fn new(client: NatsClient, subject: impl Into<String>) -> Self {
        Self {
            client,
            subject: subject.into(),
        }
    }
}

#[async_trait::async_trait]
impl ImageDescriber for NatsImageDescriber {
    async fn describe_and_store(&self, session_id: &str, image: &UploadedImage) -> Result<()> {
        let request = DescribeImageRequest {
            session_id: session_id.to_string(),
            filename: image.filename.clone(),
            mime_type: image.mime_type.clone(),
            image_url: image.data_url(),
        };

        let reply: DescribeImageReply = self.client.request_json(&self.subject, &request).await?;
        info!("Stored description of {} as {}", image.filename, reply.record_id);
        Ok(())
    }
}

/// Build the full collaborator set on one NATS connection.
pub fn pipeline(client: NatsClient, cfg: &NatsConfig) -> Pipeline {
    Pipeline {
        transcriber: Arc::new(NatsTranscriber::new(client.clone(), &cfg.transcribe_subject)),
        reasoner: Arc::new(NatsReasoner::new(client.clone(), &cfg.reason_subject)),
        synthesizer: Arc::new(NatsSynthesizer::new(client.clone(), &cfg.synthesize_subject)),
        image_describer: Arc::new(NatsImageDescriber::new(client, &cfg.describe_image_subject)),
    }
}
