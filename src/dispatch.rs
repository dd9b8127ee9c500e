//! Background dispatcher
//!
//! Transcription, reasoning and synthesis can take seconds. They run on a
//! dedicated multi-threaded runtime, separate from the one driving control
//! and media lanes, so a slow collaborator never delays message handling
//! or frame pumping. Results go back to the owning session as
//! [`DispatchEvent`]s; the session applies them on its control lane.
//!
//! Tasks are not cancelled when their session closes. A result that can no
//! longer be delivered is dropped, and a reply file written for it is
//! removed.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::audio::{PlaybackMode, Recording};
use crate::error::{SessionError, Stage};
use crate::pipeline::{AssistantTurn, Pipeline, ToolPayload, Turn};
use crate::protocol::{OutboundMessage, UploadedImage};
use crate::transport::ControlChannel;

/// Results delivered back to a session's control lane
#[derive(Debug)]
pub enum DispatchEvent {
    /// Reasoning finished; `reply_synthesized` is set when a reply file was written
    TurnCompleted {
        user: Turn,
        assistant: AssistantTurn,
        reply_synthesized: bool,
    },
    TurnFailed { error: String },
    ImageProcessed { filename: String },
    ImageFailed { filename: String, error: String },
}

/// Binding from a task back to its originating session
#[derive(Clone)]
pub struct TaskContext {
    pub session_id: String,
    pub channel: Arc<dyn ControlChannel>,
    pub events: mpsc::UnboundedSender<DispatchEvent>,
}

/// Input of a voice round trip
pub struct VoiceJob {
    pub recording: Recording,
    /// Conversation so far, excluding the new turn
    pub history: Vec<Turn>,
    pub voice_preset: Option<String>,
    pub reply_path: PathBuf,
}

pub struct Dispatcher {
    runtime: Option<Runtime>,
    handle: Handle,
    pipeline: Arc<Pipeline>,
    in_flight: Arc<AtomicUsize>,
}

impl Dispatcher {
    pub fn new(pipeline: Arc<Pipeline>, worker_threads: usize) -> Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(worker_threads.max(1))
            .thread_name("loqa-dispatch")
            .enable_all()
            .build()
            .context("Failed to start dispatcher runtime")?;
        let handle = runtime.handle().clone();

        info!("Dispatcher started with {} worker threads", worker_threads.max(1));

        Ok(Self {
            runtime: Some(runtime),
            handle,
            pipeline,
            in_flight: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Number of tasks that have not finished yet
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Run transcription → reasoning → synthesis for one recording.
    pub fn dispatch_voice(&self, job: VoiceJob, ctx: TaskContext) -> JoinHandle<()> {
        let pipeline = Arc::clone(&self.pipeline);
        let guard = InFlight::enter(&self.in_flight);

        self.handle.spawn(async move {
            let _guard = guard;
            run_voice_task(pipeline, job, ctx).await;
        })
    }

    /// Describe and store one uploaded image.
    pub fn dispatch_image(&self, image: UploadedImage, ctx: TaskContext) -> JoinHandle<()> {
        let pipeline = Arc::clone(&self.pipeline);
        let guard = InFlight::enter(&self.in_flight);

        self.handle.spawn(async move {
            let _guard = guard;
            run_image_task(pipeline, image, ctx).await;
        })
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        // Dropping a runtime from async context panics; detach instead
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

struct InFlight(Arc<AtomicUsize>);

impl InFlight {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

async fn announce(ctx: &TaskContext, message: OutboundMessage) {
    if let Err(e) = ctx.channel.send(message).await {
        debug!(session_id = %ctx.session_id, "Dropped announcement: {}", e);
    }
}

/// Clear the client's playing indicator.
async fn announce_reset(ctx: &TaskContext) {
    announce(ctx, OutboundMessage::Playing(PlaybackMode::Response)).await;
    announce(ctx, OutboundMessage::Playing(PlaybackMode::Silence)).await;
}

async fn report_failure(ctx: &TaskContext, err: SessionError) {
    error!(session_id = %ctx.session_id, "Dispatch failed: {}", err);
    announce(ctx, OutboundMessage::Ai(err.to_string())).await;
    announce_reset(ctx).await;
    let _ = ctx.events.send(DispatchEvent::TurnFailed {
        error: err.to_string(),
    });
}

async fn run_voice_task(pipeline: Arc<Pipeline>, job: VoiceJob, ctx: TaskContext) {
    let session_id = ctx.session_id.as_str();
    debug!(session_id, "Voice task started ({} frames)", job.recording.frame_count);

    let transcript = match pipeline
        .transcriber
        .transcribe(session_id, &job.recording.wav)
        .await
    {
        Ok(text) => text,
        Err(e) => {
            return report_failure(&ctx, SessionError::collaborator(Stage::Transcription, e)).await;
        }
    };

    info!(session_id, "Transcribed: {}", transcript);
    announce(&ctx, OutboundMessage::Human(transcript.clone())).await;

    let user = Turn::human(transcript);
    let assistant = match pipeline.reasoner.respond(session_id, &job.history, &user).await {
        Ok(turn) => turn,
        Err(e) => {
            return report_failure(&ctx, SessionError::collaborator(Stage::Reasoning, e)).await;
        }
    };

    if assistant.is_list_shaped() {
        announce_media(&ctx, &assistant).await;
        complete(&ctx, user, assistant, false, &job.reply_path);
        return;
    }

    let reply_text = assistant.spoken_text().unwrap_or_default().trim().to_string();

    if reply_text.is_empty() {
        debug!(session_id, "Empty reply, nothing to synthesize");
        announce_reset(&ctx).await;
        complete(&ctx, user, assistant, false, &job.reply_path);
        return;
    }

    info!(session_id, "Reply: {}", reply_text);
    announce(&ctx, OutboundMessage::Ai(reply_text.clone())).await;

    if let Err(e) = pipeline
        .synthesizer
        .synthesize(
            session_id,
            &reply_text,
            job.voice_preset.as_deref(),
            &job.reply_path,
        )
        .await
    {
        return report_failure(&ctx, SessionError::collaborator(Stage::Synthesis, e)).await;
    }

    announce(&ctx, OutboundMessage::Log("synthesized".to_string())).await;
    complete(&ctx, user, assistant, true, &job.reply_path);
}

async fn announce_media(ctx: &TaskContext, assistant: &AssistantTurn) {
    if let AssistantTurn::ToolResult {
        tool,
        payload: ToolPayload::Media(refs),
    } = assistant
    {
        info!(session_id = %ctx.session_id, "Tool {} returned {} media references", tool, refs.len());
        announce_reset(ctx).await;
        for reference in refs {
            announce(ctx, OutboundMessage::Image(reference.clone())).await;
        }
    }
}

fn complete(
    ctx: &TaskContext,
    user: Turn,
    assistant: AssistantTurn,
    reply_synthesized: bool,
    reply_path: &std::path::Path,
) {
    let event = DispatchEvent::TurnCompleted {
        user,
        assistant,
        reply_synthesized,
    };

    if ctx.events.send(event).is_err() {
        warn!(session_id = %ctx.session_id, "Session closed before its reply was delivered");
        if reply_synthesized {
            if let Err(e) = std::fs::remove_file(reply_path) {
                debug!("Failed to remove orphaned reply {}: {}", reply_path.display(), e);
            }
        }
    }
}

async fn run_image_task(pipeline: Arc<Pipeline>, image: UploadedImage, ctx: TaskContext) {
    let session_id = ctx.session_id.as_str();
    info!(session_id, "Processing upload {} ({})", image.filename, image.mime_type);

    match pipeline
        .image_describer
        .describe_and_store(session_id, &image)
        .await
    {
        Ok(()) => {
            announce(&ctx, OutboundMessage::Uploaded(image.filename.clone())).await;
            let _ = ctx.events.send(DispatchEvent::ImageProcessed {
                filename: image.filename,
            });
        }
        Err(e) => {
            let err = SessionError::collaborator(Stage::ImageDescription, e);
            error!(session_id, "Upload {} failed: {}", image.filename, err);
            announce(&ctx, OutboundMessage::Ai(err.to_string())).await;
            let _ = ctx.events.send(DispatchEvent::ImageFailed {
                filename: image.filename,
                error: err.to_string(),
            });
        }
    }
}
