//! WebSocket adapter for the transport seam
//!
//! Text frames carry the control channel in both directions. Binary frames
//! carry 16-bit little-endian PCM: inbound at the configured input format,
//! outbound at the silence format, which replies are converted to.

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, error, info, warn};

use super::{link, RemoteEnd, TransportEvent};
use crate::audio::AudioFrame;
use crate::session::SessionManager;

/// Queue depth between the socket and its session
const LINK_CAPACITY: usize = 64;

/// Bridge one upgraded socket to a new session until either side closes.
pub async fn serve_socket(socket: WebSocket, manager: SessionManager) {
    let (peer, remote) = link(LINK_CAPACITY);

    let session_id = match manager.create(peer).await {
        Ok(id) => id,
        Err(e) => {
            error!("Failed to create session: {:#}", e);
            return;
        }
    };

    let RemoteEnd {
        control_tx,
        audio_tx,
        events_tx,
        mut control_rx,
        mut audio_rx,
    } = remote;

    let sample_rate = manager.config().audio.input_sample_rate;
    let channels = manager.config().audio.input_channels;

    let (mut ws_tx, mut ws_rx) = socket.split();
    info!("Client connected to session {}", session_id);
    let _ = events_tx.send(TransportEvent::Connected).await;

    // Ends once the session drops its end of the link
    let writer_id = session_id.clone();
    let mut writer = tokio::spawn(async move {
        loop {
            let message = tokio::select! {
                text = control_rx.recv() => match text {
                    Some(text) => Message::Text(text),
                    None => break,
                },
                frame = audio_rx.recv() => match frame {
                    Some(frame) => Message::Binary(frame.to_le_bytes()),
                    None => break,
                },
            };

            if let Err(e) = ws_tx.send(message).await {
                debug!("Session {} socket write failed: {}", writer_id, e);
                return;
            }
        }
        let _ = ws_tx.close().await;
    });

    let mut pts = 0u64;
    let mut outcome = TransportEvent::Closed;

    loop {
        let message = tokio::select! {
            message = ws_rx.next() => message,
            _ = &mut writer => {
                debug!("Session {} ended, closing socket", session_id);
                break;
            }
        };

        match message {
            Some(Ok(Message::Text(text))) => {
                if control_tx.send(text).await.is_err() {
                    break;
                }
            }
            Some(Ok(Message::Binary(bytes))) => {
                let frame = AudioFrame::from_le_bytes(&bytes, sample_rate, channels, pts);
                pts += frame.sample_count() as u64;
                match audio_tx.try_send(frame) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        debug!("Session {} inbound audio queue full, dropping frame", session_id);
                    }
                    Err(TrySendError::Closed(_)) => break,
                }
            }
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                warn!("Session {} socket error: {}", session_id, e);
                outcome = TransportEvent::Failed(e.to_string());
                break;
            }
        }
    }

    let _ = events_tx.send(outcome).await;
    writer.abort();
    info!("Client disconnected from session {}", session_id);
}
