//! Transport seam between a session and its peer
//!
//! A session only sees queues: inbound control messages, inbound audio
//! frames and connectivity events, plus an outbound control channel and an
//! outbound audio sink. [`link`] builds both ends in memory; an adapter
//! (see [`websocket`]) bridges the remote end to a real connection.

pub mod websocket;

use anyhow::Result;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

use crate::audio::AudioFrame;
use crate::protocol::OutboundMessage;

/// Connectivity events reported by the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connected,
    Failed(String),
    Closed,
}

/// Reliable, ordered text side-channel to the client
#[async_trait::async_trait]
pub trait ControlChannel: Send + Sync {
    async fn send(&self, message: OutboundMessage) -> Result<()>;

    fn is_open(&self) -> bool {
        true
    }
}

/// Outbound audio track
#[async_trait::async_trait]
pub trait AudioSink: Send + Sync {
    async fn write_frame(&self, frame: &AudioFrame) -> Result<()>;
}

/// Control channel backed by an unbounded queue of wire strings
pub struct QueuedControlChannel {
    tx: mpsc::UnboundedSender<String>,
}

impl QueuedControlChannel {
    pub fn new(tx: mpsc::UnboundedSender<String>) -> Self {
        Self { tx }
    }
}

#[async_trait::async_trait]
impl ControlChannel for QueuedControlChannel {
    async fn send(&self, message: OutboundMessage) -> Result<()> {
        let text = message.to_string();
        debug!("Control channel -> {}", text);
        self.tx
            .send(text)
            .map_err(|_| anyhow::anyhow!("Control channel closed"))
    }

    fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// Audio sink backed by a bounded queue. A full queue drops the frame so
/// the media loop never waits on a slow peer.
pub struct QueuedAudioSink {
    tx: mpsc::Sender<AudioFrame>,
}

impl QueuedAudioSink {
    pub fn new(tx: mpsc::Sender<AudioFrame>) -> Self {
        Self { tx }
    }
}

#[async_trait::async_trait]
impl AudioSink for QueuedAudioSink {
    async fn write_frame(&self, frame: &AudioFrame) -> Result<()> {
        match self.tx.try_send(frame.clone()) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!("Outbound audio queue full, dropping frame");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                anyhow::bail!("Outbound audio track closed")
            }
        }
    }
}

/// Session side of a peer connection
pub struct PeerLink {
    pub control_rx: mpsc::Receiver<String>,
    pub audio_rx: mpsc::Receiver<AudioFrame>,
    pub events_rx: mpsc::Receiver<TransportEvent>,
    pub channel: Arc<dyn ControlChannel>,
    pub sink: Arc<dyn AudioSink>,
}

/// Peer side of a peer connection
pub struct RemoteEnd {
    pub control_tx: mpsc::Sender<String>,
    pub audio_tx: mpsc::Sender<AudioFrame>,
    pub events_tx: mpsc::Sender<TransportEvent>,
    pub control_rx: mpsc::UnboundedReceiver<String>,
    pub audio_rx: mpsc::Receiver<AudioFrame>,
}

/// Build both ends of an in-memory link. `capacity` bounds the audio and
/// inbound control queues.
pub fn link(capacity: usize) -> (PeerLink, RemoteEnd) {
    let (control_in_tx, control_in_rx) = mpsc::channel(capacity);
    let (audio_in_tx, audio_in_rx) = mpsc::channel(capacity);
    let (events_tx, events_rx) = mpsc::channel(8);
    let (control_out_tx, control_out_rx) = mpsc::unbounded_channel();
    let (audio_out_tx, audio_out_rx) = mpsc::channel(capacity);

    let peer = PeerLink {
        control_rx: control_in_rx,
        audio_rx: audio_in_rx,
        events_rx,
        channel: Arc::new(QueuedControlChannel::new(control_out_tx)),
        sink: Arc::new(QueuedAudioSink::new(audio_out_tx)),
    };

    let remote = RemoteEnd {
        control_tx: control_in_tx,
        audio_tx: audio_in_tx,
        events_tx,
        control_rx: control_out_rx,
        audio_rx: audio_out_rx,
    };

    (peer, remote)
}
