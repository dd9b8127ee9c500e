//! Outbound playback source multiplexer
//!
//! The outbound track is fed from exactly one source at a time: a run of
//! silence or the most recent synthesized reply. Switching is lazy. A
//! request only flips a flag; the swap happens when the open source runs
//! out or stalls, and the reply flag is consumed when the reply source
//! opens, so a reply plays once before playback falls back to silence.
//!
//! A reply is decoded in the background. Each pull waits at most one pull
//! timeout for it and keeps silence flowing until it is ready.
//!
//! Presentation timestamps are clamped against a clock that advances one
//! frame per pull, independent of the active source.

use anyhow::{Context, Result};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::frame::{AudioFrame, FRAMES_PER_SECOND};
use super::source::{PlaybackSource, SourceOpener};
use crate::error::SessionError;
use crate::protocol::OutboundMessage;
use crate::transport::ControlChannel;

/// Which source feeds the outbound track
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackMode {
    Silence,
    Response,
}

impl PlaybackMode {
    fn to_code(mode: Option<PlaybackMode>) -> u8 {
        match mode {
            None => 0,
            Some(PlaybackMode::Silence) => 1,
            Some(PlaybackMode::Response) => 2,
        }
    }

    fn from_code(code: u8) -> Option<PlaybackMode> {
        match code {
            1 => Some(PlaybackMode::Silence),
            2 => Some(PlaybackMode::Response),
            _ => None,
        }
    }
}

impl fmt::Display for PlaybackMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlaybackMode::Silence => f.write_str("silence"),
            PlaybackMode::Response => f.write_str("response"),
        }
    }
}

const READY_BIT: u64 = 1;

struct OpenSource {
    mode: PlaybackMode,
    source: Box<dyn PlaybackSource>,
}

/// A reply decode started by an earlier pull
struct PendingReply {
    generation: u64,
    task: JoinHandle<Result<Box<dyn PlaybackSource>>>,
}

struct MuxState {
    open: Option<OpenSource>,
    pending: Option<PendingReply>,
    /// Frames handed out so far; the presentation clock
    frames_played: u64,
    /// Last emitted pts and the sample rate it was expressed in
    last_pts: Option<(u64, u32)>,
    last_announced: Option<PlaybackMode>,
    channel: Option<Arc<dyn ControlChannel>>,
}

pub struct PlaybackMultiplexer {
    reply_path: PathBuf,
    /// Request generation in the upper bits, reply-ready flag in bit 0.
    /// Every request bumps the generation so a superseded reply decode is
    /// dropped.
    request: AtomicU64,
    /// Mirror of the open source's mode, readable without the state lock
    mode: AtomicU8,
    opener: Arc<dyn SourceOpener>,
    pull_timeout: Duration,
    /// Format of the fallback frame when no source yields anything
    fallback_sample_rate: u32,
    fallback_channels: u16,
    state: Mutex<MuxState>,
}

impl PlaybackMultiplexer {
    pub fn new(
        reply_path: PathBuf,
        opener: Arc<dyn SourceOpener>,
        pull_timeout: Duration,
        fallback_sample_rate: u32,
        fallback_channels: u16,
    ) -> Self {
        Self {
            reply_path,
            request: AtomicU64::new(0),
            mode: AtomicU8::new(0),
            opener,
            pull_timeout,
            fallback_sample_rate,
            fallback_channels,
            state: Mutex::new(MuxState {
                open: None,
                pending: None,
                frames_played: 0,
                last_pts: None,
                last_announced: None,
                channel: None,
            }),
        }
    }

    /// Set the control channel used for mode announcements.
    pub fn with_channel(mut self, channel: Arc<dyn ControlChannel>) -> Self {
        self.state.get_mut().channel = Some(channel);
        self
    }

    /// Bind the control channel used for mode announcements.
    pub async fn bind_channel(&self, channel: Arc<dyn ControlChannel>) {
        self.state.lock().await.channel = Some(channel);
    }

    pub fn reply_path(&self) -> &Path {
        &self.reply_path
    }

    pub fn request_silence(&self) {
        self.bump_request(false);
    }

    /// Queue the reply for playback. Fails if no reply file exists.
    pub fn request_response(&self) -> Result<(), SessionError> {
        if !self.reply_path.is_file() {
            return Err(SessionError::NoReplyAvailable {
                path: self.reply_path.clone(),
            });
        }
        self.bump_request(true);
        Ok(())
    }

    pub fn response_ready(&self) -> bool {
        self.request.load(Ordering::SeqCst) & READY_BIT != 0
    }

    /// Mode of the currently open source, if any.
    pub fn current_mode(&self) -> Option<PlaybackMode> {
        PlaybackMode::from_code(self.mode.load(Ordering::SeqCst))
    }

    /// Elapsed playback time according to the presentation clock.
    pub async fn elapsed(&self) -> Duration {
        let frames = self.state.lock().await.frames_played;
        Duration::from_millis(frames * 1000 / FRAMES_PER_SECOND as u64)
    }

    /// Produce the next outbound frame. Never fails: a stalled or exhausted
    /// source is replaced, and as a last resort a silent frame is returned.
    pub async fn next_frame(&self) -> AudioFrame {
        let mut state = self.state.lock().await;

        if state.open.is_none() {
            self.open_next(&mut state).await;
        }

        let frame = match self.pull(&mut state).await {
            Some(frame) => frame,
            None => {
                if let Some(exhausted) = state.open.take() {
                    debug!(
                        "Playback source {} ({}) ended or stalled",
                        exhausted.source.name(),
                        exhausted.mode
                    );
                }
                self.open_next(&mut state).await;
                match self.pull(&mut state).await {
                    Some(frame) => frame,
                    None => {
                        warn!("Playback underrun, substituting a silent frame");
                        state.open = None;
                        self.mode.store(PlaybackMode::to_code(None), Ordering::SeqCst);
                        AudioFrame::silent(self.fallback_sample_rate, self.fallback_channels, 0)
                    }
                }
            }
        };

        self.stamp(&mut state, frame)
    }

    /// Delete the reply file, if any. Missing files are not an error.
    pub fn discard_reply(&self) {
        self.request_silence();
        match std::fs::remove_file(&self.reply_path) {
            Ok(()) => debug!("Removed reply file {}", self.reply_path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove reply file {}: {}", self.reply_path.display(), e),
        }
    }

    fn bump_request(&self, ready: bool) {
        let flag = if ready { READY_BIT } else { 0 };
        // The closure always returns Some, so this cannot fail
        let _ = self
            .request
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |request| {
                Some((((request >> 1) + 1) << 1) | flag)
            });
    }

    async fn pull(&self, state: &mut MuxState) -> Option<AudioFrame> {
        let open = state.open.as_mut()?;
        match tokio::time::timeout(self.pull_timeout, open.source.next_frame()).await {
            Ok(frame) => frame,
            Err(_) => {
                debug!("Playback source {} timed out", open.source.name());
                None
            }
        }
    }

    async fn open_next(&self, state: &mut MuxState) {
        // A reply is consumed the moment its decode starts
        let consumed = self
            .request
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |request| {
                (request & READY_BIT != 0).then_some(request & !READY_BIT)
            });
        if let Ok(request) = consumed {
            self.start_reply(state, request >> 1);
        }

        let reply = match self.take_reply(state).await {
            Some(Ok(source)) => Some(source),
            Some(Err(e)) => {
                warn!("Failed to open reply, falling back to silence: {:#}", e);
                None
            }
            None => None,
        };

        let (mode, source) = match reply {
            Some(source) => (PlaybackMode::Response, source),
            None => match self.open_silence().await {
                Some(source) => (PlaybackMode::Silence, source),
                None => {
                    self.mode.store(PlaybackMode::to_code(None), Ordering::SeqCst);
                    return;
                }
            },
        };

        debug!("Selected {} source", mode);
        state.open = Some(OpenSource { mode, source });
        self.mode.store(PlaybackMode::to_code(Some(mode)), Ordering::SeqCst);
        self.announce(state, mode).await;
    }

    fn start_reply(&self, state: &mut MuxState, generation: u64) {
        if let Some(stale) = state.pending.take() {
            stale.task.abort();
        }

        let opener = Arc::clone(&self.opener);
        let path = self.reply_path.clone();
        let task = tokio::spawn(async move { opener.open(PlaybackMode::Response, &path).await });
        state.pending = Some(PendingReply {
            generation,
            task,
        });
    }

    /// The pending reply decode, if it finishes within one pull timeout.
    async fn take_reply(&self, state: &mut MuxState) -> Option<Result<Box<dyn PlaybackSource>>> {
        let pending = state.pending.as_mut()?;
        if pending.generation != self.request.load(Ordering::SeqCst) >> 1 {
            debug!("Dropping superseded reply decode");
            if let Some(stale) = state.pending.take() {
                stale.task.abort();
            }
            return None;
        }

        match tokio::time::timeout(self.pull_timeout, &mut pending.task).await {
            Ok(joined) => {
                state.pending = None;
                Some(joined.context("Reply decoder task failed").and_then(|opened| opened))
            }
            Err(_) => {
                debug!("Reply still decoding, keeping silence");
                None
            }
        }
    }

    async fn open_silence(&self) -> Option<Box<dyn PlaybackSource>> {
        let opened = tokio::time::timeout(
            self.pull_timeout,
            self.opener.open(PlaybackMode::Silence, &self.reply_path),
        )
        .await;
        match opened {
            Ok(Ok(source)) => Some(source),
            Ok(Err(e)) => {
                warn!("Failed to open silence source: {:#}", e);
                None
            }
            Err(_) => {
                warn!("Silence source did not open within {:?}", self.pull_timeout);
                None
            }
        }
    }

    async fn announce(&self, state: &mut MuxState, mode: PlaybackMode) {
        if mode == PlaybackMode::Silence && state.last_announced == Some(PlaybackMode::Silence) {
            return;
        }

        let Some(channel) = state.channel.as_ref() else {
            return;
        };
        if !channel.is_open() {
            return;
        }

        if let Err(e) = channel.send(OutboundMessage::Playing(mode)).await {
            debug!("Failed to announce playback mode: {}", e);
            return;
        }
        state.last_announced = Some(mode);
    }

    fn stamp(&self, state: &mut MuxState, mut frame: AudioFrame) -> AudioFrame {
        let rate = frame.sample_rate as u64;
        let clock = rate * state.frames_played / FRAMES_PER_SECOND as u64;
        let floor = match state.last_pts {
            // Carry the previous pts over into this frame's rate
            Some((last, last_rate)) => clock.max(last * rate / (last_rate as u64).max(1) + 1),
            None => clock,
        };
        if frame.pts < floor {
            frame.pts = floor;
        }
        state.last_pts = Some((frame.pts, frame.sample_rate));
        state.frames_played += 1;
        frame
    }
}

impl Drop for PlaybackMultiplexer {
    fn drop(&mut self) {
        if let Some(pending) = self.state.get_mut().pending.take() {
            pending.task.abort();
        }
    }
}
