use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::config::SessionConfig;
use super::stats::{ConnectionState, SessionStats};
use crate::audio::{
    AudioFrame, CaptureBuffer, FileSourceOpener, PlaybackMultiplexer, SourceOpener, FRAME_DURATION,
};
use crate::dispatch::{DispatchEvent, Dispatcher, TaskContext, VoiceJob};
use crate::error::SessionError;
use crate::pipeline::{AssistantTurn, Turn};
use crate::protocol::{Command, OutboundMessage, UploadCommand, UploadReassembler};
use crate::transport::{AudioSink, ControlChannel, PeerLink, TransportEvent};

/// One voice session per peer connection.
///
/// All state mutation happens on the control lane (`run`), one message or
/// dispatcher result at a time. The media lanes only touch the capture
/// buffer and the multiplexer, both of which are shared behind locks.
pub struct Session {
    config: SessionConfig,
    connection_state: ConnectionState,
    created_at: DateTime<Utc>,
    recording: bool,
    capture: Arc<Mutex<CaptureBuffer>>,
    multiplexer: Arc<PlaybackMultiplexer>,
    upload: Option<UploadReassembler>,
    history: Vec<Turn>,
    voice_preset: Option<String>,
    channel: Arc<dyn ControlChannel>,
    dispatcher: Arc<Dispatcher>,
    events_tx: mpsc::UnboundedSender<DispatchEvent>,
    events_rx: mpsc::UnboundedReceiver<DispatchEvent>,
    stats: Arc<RwLock<SessionStats>>,
    media_tasks: Vec<JoinHandle<()>>,
    tasks_dispatched: usize,
}

impl Session {
    pub fn new(
        config: SessionConfig,
        channel: Arc<dyn ControlChannel>,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        let opener = Arc::new(FileSourceOpener {
            silence_sample_rate: config.silence_sample_rate,
            silence_channels: 1,
            silence_length: config.silence_clip,
        });
        Self::with_opener(config, channel, dispatcher, opener)
    }

    /// Like [`Session::new`] with a custom playback source opener.
    pub fn with_opener(
        config: SessionConfig,
        channel: Arc<dyn ControlChannel>,
        dispatcher: Arc<Dispatcher>,
        opener: Arc<dyn SourceOpener>,
    ) -> Self {
        info!("Creating voice session: {}", config.session_id);

        let capture = CaptureBuffer::new(
            config.input_sample_rate,
            config.input_channels,
            config.max_recording,
        );
        let multiplexer = PlaybackMultiplexer::new(
            config.reply_path.clone(),
            opener,
            config.source_timeout,
            config.silence_sample_rate,
            1,
        )
        .with_channel(Arc::clone(&channel));
        let created_at = Utc::now();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let stats = SessionStats {
            session_id: config.session_id.clone(),
            connection_state: ConnectionState::Created,
            is_recording: false,
            created_at,
            history_len: 0,
            tasks_dispatched: 0,
            playback_mode: None,
            voice_preset: config.default_voice_preset.clone(),
            upload_in_progress: false,
        };

        Self {
            config,
            connection_state: ConnectionState::Created,
            created_at,
            recording: false,
            capture: Arc::new(Mutex::new(capture)),
            multiplexer: Arc::new(multiplexer),
            upload: None,
            history: Vec::new(),
            voice_preset: None,
            channel,
            dispatcher,
            events_tx,
            events_rx,
            stats: Arc::new(RwLock::new(stats)),
            media_tasks: Vec::new(),
            tasks_dispatched: 0,
        }
    }

    pub fn id(&self) -> &str {
        &self.config.session_id
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection_state
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    pub fn history(&self) -> &[Turn] {
        &self.history
    }

    /// Preset used for the next synthesis
    pub fn voice_preset(&self) -> Option<&str> {
        self.voice_preset
            .as_deref()
            .or(self.config.default_voice_preset.as_deref())
    }

    pub fn capture(&self) -> Arc<Mutex<CaptureBuffer>> {
        Arc::clone(&self.capture)
    }

    pub fn multiplexer(&self) -> Arc<PlaybackMultiplexer> {
        Arc::clone(&self.multiplexer)
    }

    pub fn stats_handle(&self) -> Arc<RwLock<SessionStats>> {
        Arc::clone(&self.stats)
    }

    /// Drive the session until the transport closes or fails, or until
    /// `close_rx` fires.
    pub async fn run(mut self, link: PeerLink, mut close_rx: mpsc::Receiver<()>) {
        let PeerLink {
            mut control_rx,
            audio_rx,
            mut events_rx,
            sink,
            ..
        } = link;

        info!(session_id = %self.id(), "Session started");
        self.start_media(audio_rx, sink);
        self.publish_stats().await;

        loop {
            tokio::select! {
                biased;

                Some(event) = events_rx.recv() => {
                    if self.handle_transport_event(event).await {
                        break;
                    }
                }
                _ = close_rx.recv() => {
                    self.close().await;
                    break;
                }
                message = control_rx.recv() => match message {
                    Some(message) => self.handle_message(&message).await,
                    None => {
                        info!(session_id = %self.id(), "Control channel closed");
                        self.close().await;
                        break;
                    }
                },
                Some(event) = self.events_rx.recv() => {
                    self.handle_dispatch_event(event).await;
                }
            }
        }

        info!(session_id = %self.id(), "Session ended");
    }

    /// Spawn the inbound (capture) and outbound (playback) media loops.
    pub fn start_media(&mut self, audio_rx: mpsc::Receiver<AudioFrame>, sink: Arc<dyn AudioSink>) {
        let capture = Arc::clone(&self.capture);
        self.media_tasks
            .push(tokio::spawn(pump_inbound(capture, audio_rx)));

        let multiplexer = Arc::clone(&self.multiplexer);
        self.media_tasks
            .push(tokio::spawn(pump_outbound(multiplexer, sink)));
    }

    /// Handle one control-channel message.
    pub async fn handle_message(&mut self, message: &str) {
        let command = Command::parse(message);
        match &command {
            Command::Upload(UploadCommand::Chunk(chunk)) => {
                debug!(session_id = %self.id(), "Upload chunk ({} bytes)", chunk.len());
            }
            _ => debug!(session_id = %self.id(), "Received message on channel: {}", message),
        }

        match command {
            Command::GetResponse => {
                if let Err(e) = self.multiplexer.request_response() {
                    self.report(e).await;
                }
            }
            Command::GetSilence => self.multiplexer.request_silence(),
            Command::StartRecording => self.start_recording().await,
            Command::StopRecording => self.stop_recording().await,
            Command::Upload(upload) => self.handle_upload(upload).await,
            Command::Preset(name) => {
                info!(session_id = %self.id(), "Changed voice preset to {:?}", name);
                self.voice_preset = if name.is_empty() { None } else { Some(name) };
            }
            Command::Unknown(_) => {
                debug!(session_id = %self.id(), "Ignoring unrecognized message");
            }
        }

        self.publish_stats().await;
    }

    async fn start_recording(&mut self) {
        info!(session_id = %self.id(), "Start recording");
        self.multiplexer.request_silence();
        self.capture.lock().await.start();
        self.recording = true;
    }

    async fn stop_recording(&mut self) {
        if !self.recording {
            debug!(session_id = %self.id(), "stop_recording without an active recording");
            return;
        }

        info!(session_id = %self.id(), "Stop recording");
        self.recording = false;

        let flushed = self.capture.lock().await.stop_and_flush();
        let recording = match flushed {
            Ok(recording) => recording,
            Err(e) => {
                error!(session_id = %self.id(), "Failed to flush recording: {:#}", e);
                self.send(OutboundMessage::Ai(format!("recording failed: {}", e)))
                    .await;
                return;
            }
        };

        let job = VoiceJob {
            recording,
            history: self.history.clone(),
            voice_preset: self.voice_preset().map(str::to_string),
            reply_path: self.config.reply_path.clone(),
        };
        self.dispatcher.dispatch_voice(job, self.task_context());
        self.tasks_dispatched += 1;
    }

    async fn handle_upload(&mut self, command: UploadCommand) {
        match command {
            UploadCommand::Start => {
                if self.upload.is_some() {
                    warn!(session_id = %self.id(), "Discarding incomplete upload");
                }
                self.upload = Some(UploadReassembler::new());
            }
            UploadCommand::Chunk(chunk) => match self.upload.as_mut() {
                Some(upload) => upload.push(chunk),
                None => {
                    self.report(SessionError::UploadProtocol(
                        "chunk received without upload:START".to_string(),
                    ))
                    .await;
                }
            },
            UploadCommand::Done => {
                let Some(upload) = self.upload.take() else {
                    self.report(SessionError::UploadProtocol(
                        "upload:DONE received without upload:START".to_string(),
                    ))
                    .await;
                    return;
                };

                match upload.finish() {
                    Ok(image) => {
                        info!(session_id = %self.id(), "Upload {} reassembled", image.filename);
                        self.dispatcher.dispatch_image(image, self.task_context());
                        self.tasks_dispatched += 1;
                    }
                    Err(e) => self.report(e).await,
                }
            }
        }
    }

    /// Apply a background task result on the control lane.
    pub async fn handle_dispatch_event(&mut self, event: DispatchEvent) {
        match event {
            DispatchEvent::TurnCompleted {
                user,
                assistant,
                reply_synthesized,
            } => {
                self.record_turn(user, &assistant);
                if reply_synthesized {
                    if let Err(e) = self.multiplexer.request_response() {
                        self.report(e).await;
                    }
                }
            }
            DispatchEvent::TurnFailed { error } => {
                debug!(session_id = %self.id(), "Turn failed: {}", error);
            }
            DispatchEvent::ImageProcessed { filename } => {
                info!(session_id = %self.id(), "Upload {} processed", filename);
            }
            DispatchEvent::ImageFailed { filename, error } => {
                debug!(session_id = %self.id(), "Upload {} failed: {}", filename, error);
            }
        }

        self.publish_stats().await;
    }

    /// Wait for the next background task result.
    pub async fn next_dispatch_event(&mut self) -> Option<DispatchEvent> {
        self.events_rx.recv().await
    }

    /// Apply a connectivity change. Returns `true` once the session is over.
    pub async fn handle_transport_event(&mut self, event: TransportEvent) -> bool {
        match event {
            TransportEvent::Connected => {
                if self.connection_state == ConnectionState::Created {
                    info!(session_id = %self.id(), "Connection state is connected");
                    self.connection_state = ConnectionState::Connected;
                    self.publish_stats().await;
                }
                false
            }
            TransportEvent::Failed(reason) => {
                let err = SessionError::Transport(reason);
                warn!(session_id = %self.id(), "{}", err);
                self.teardown(ConnectionState::Failed).await;
                self.close().await;
                true
            }
            TransportEvent::Closed => {
                self.close().await;
                true
            }
        }
    }

    /// Close the session: stop media, drop the history and delete the reply
    /// file. In-flight background tasks are left to finish on their own.
    pub async fn close(&mut self) {
        if self.connection_state == ConnectionState::Closed {
            return;
        }

        self.teardown(ConnectionState::Closed).await;
        self.history.clear();
        self.multiplexer.discard_reply();
        self.publish_stats().await;

        info!(
            session_id = %self.id(),
            "Session closed after {:.1}s",
            (Utc::now() - self.created_at).num_milliseconds() as f64 / 1000.0
        );
    }

    async fn teardown(&mut self, state: ConnectionState) {
        for task in self.media_tasks.drain(..) {
            task.abort();
        }
        self.capture.lock().await.reset();
        self.recording = false;
        self.upload = None;
        self.connection_state = state;
        self.publish_stats().await;
    }

    fn record_turn(&mut self, user: Turn, assistant: &AssistantTurn) {
        if assistant.is_list_shaped() && !self.config.tool_results_in_history {
            debug!(session_id = %self.id(), "Tool result kept out of history");
            return;
        }

        self.history.push(user);
        self.history.push(assistant.to_turn());

        let limit = self.config.history_limit;
        if limit > 0 && self.history.len() > limit {
            let excess = self.history.len() - limit;
            self.history.drain(..excess);
        }
    }

    fn task_context(&self) -> TaskContext {
        TaskContext {
            session_id: self.config.session_id.clone(),
            channel: Arc::clone(&self.channel),
            events: self.events_tx.clone(),
        }
    }

    async fn send(&self, message: OutboundMessage) {
        if let Err(e) = self.channel.send(message).await {
            debug!(session_id = %self.id(), "Control channel send failed: {}", e);
        }
    }

    async fn report(&self, err: SessionError) {
        warn!(session_id = %self.id(), "{}", err);
        self.send(OutboundMessage::Ai(err.to_string())).await;
    }

    async fn publish_stats(&self) {
        let playback_mode = self.multiplexer.current_mode();
        let mut stats = self.stats.write().await;
        stats.connection_state = self.connection_state;
        stats.is_recording = self.recording;
        stats.history_len = self.history.len();
        stats.tasks_dispatched = self.tasks_dispatched;
        stats.playback_mode = playback_mode;
        stats.voice_preset = self.voice_preset().map(str::to_string);
        stats.upload_in_progress = self.upload.is_some();
    }
}

/// Inbound media lane: append frames while recording.
async fn pump_inbound(capture: Arc<Mutex<CaptureBuffer>>, mut audio_rx: mpsc::Receiver<AudioFrame>) {
    while let Some(frame) = audio_rx.recv().await {
        capture.lock().await.append(frame);
    }
    debug!("Inbound audio track ended");
}

/// Outbound media lane: one multiplexer frame per 20ms tick.
async fn pump_outbound(multiplexer: Arc<PlaybackMultiplexer>, sink: Arc<dyn AudioSink>) {
    let mut ticker = tokio::time::interval(FRAME_DURATION);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let frame = multiplexer.next_frame().await;
        if let Err(e) = sink.write_frame(&frame).await {
            debug!("Outbound audio track ended: {}", e);
            break;
        }
    }
}
