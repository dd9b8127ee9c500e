// Integration tests for the playback multiplexer
//
// These tests verify lazy source switching, one-shot reply playback,
// timestamp continuity, recovery from a stalled source and that a slow
// reply decode never holds up the outbound track.

mod common;

use anyhow::{bail, Result};
use common::RecordingChannel;
use loqa_voice::audio::{
    AudioFrame, FileSourceOpener, PlaybackMode, PlaybackMultiplexer, PlaybackSource, SourceOpener,
};
use loqa_voice::error::SessionError;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

const RESPONSE_SAMPLE: i16 = 7;

/// Yields `remaining` frames, then optionally hangs instead of ending
struct ScriptedSource {
    name: &'static str,
    value: i16,
    sample_rate: u32,
    remaining: usize,
    pts: u64,
    stall_when_done: bool,
}

#[async_trait::async_trait]
impl PlaybackSource for ScriptedSource {
    async fn next_frame(&mut self) -> Option<AudioFrame> {
        if self.remaining == 0 {
            if self.stall_when_done {
                futures::future::pending::<()>().await;
            }
            return None;
        }
        self.remaining -= 1;

        let mut frame = AudioFrame::silent(self.sample_rate, 1, self.pts);
        frame.samples.iter_mut().for_each(|s| *s = self.value);
        self.pts += frame.sample_count() as u64;
        Some(frame)
    }

    fn name(&self) -> &str {
        self.name
    }
}

struct ScriptedOpener {
    silence_frames: usize,
    response_frames: usize,
    stall_response: bool,
    fail_response: bool,
    response_rate: u32,
    response_delay: Duration,
    opened: AtomicUsize,
}

impl ScriptedOpener {
    fn new(silence_frames: usize, response_frames: usize) -> Self {
        Self {
            silence_frames,
            response_frames,
            stall_response: false,
            fail_response: false,
            response_rate: 16000,
            response_delay: Duration::ZERO,
            opened: AtomicUsize::new(0),
        }
    }
}

#[async_trait::async_trait]
impl SourceOpener for ScriptedOpener {
    async fn open(&self, mode: PlaybackMode, _reply_path: &Path) -> Result<Box<dyn PlaybackSource>> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        match mode {
            PlaybackMode::Silence => Ok(Box::new(ScriptedSource {
                name: "silence",
                value: 0,
                sample_rate: 16000,
                remaining: self.silence_frames,
                pts: 0,
                stall_when_done: false,
            })),
            PlaybackMode::Response => {
                if !self.response_delay.is_zero() {
                    tokio::time::sleep(self.response_delay).await;
                }
                if self.fail_response {
                    bail!("corrupt reply");
                }
                Ok(Box::new(ScriptedSource {
                    name: "response",
                    value: RESPONSE_SAMPLE,
                    sample_rate: self.response_rate,
                    remaining: self.response_frames,
                    pts: 0,
                    stall_when_done: self.stall_response,
                }))
            }
        }
    }
}

fn reply_file(dir: &TempDir) -> Result<PathBuf> {
    let path = dir.path().join("session-test.wav");
    std::fs::write(&path, b"placeholder")?;
    Ok(path)
}

fn multiplexer(path: PathBuf, opener: ScriptedOpener) -> (PlaybackMultiplexer, Arc<RecordingChannel>) {
    let channel = RecordingChannel::new();
    let mux = PlaybackMultiplexer::new(path, Arc::new(opener), Duration::from_millis(20), 16000, 1)
        .with_channel(channel.clone());
    (mux, channel)
}

fn is_response(frame: &AudioFrame) -> bool {
    frame.samples.iter().all(|&s| s == RESPONSE_SAMPLE)
}

#[tokio::test]
async fn test_silence_plays_until_reply_requested() -> Result<()> {
    let dir = TempDir::new()?;
    let (mux, channel) = multiplexer(dir.path().join("missing.wav"), ScriptedOpener::new(3, 3));

    for _ in 0..10 {
        let frame = mux.next_frame().await;
        assert!(!is_response(&frame));
    }

    assert_eq!(mux.current_mode(), Some(PlaybackMode::Silence));
    // Repeated silence sources are announced once
    assert_eq!(channel.messages(), vec!["playing: silence"]);
    Ok(())
}

#[tokio::test]
async fn test_reply_plays_once_then_silence() -> Result<()> {
    let dir = TempDir::new()?;
    let (mux, channel) = multiplexer(reply_file(&dir)?, ScriptedOpener::new(2, 4));

    mux.next_frame().await;
    mux.request_response()?;
    assert!(mux.response_ready());

    // The open silence source finishes first
    assert!(!is_response(&mux.next_frame().await));

    let mut played = 0;
    for _ in 0..20 {
        if is_response(&mux.next_frame().await) {
            played += 1;
        }
    }

    assert_eq!(played, 4);
    assert!(!mux.response_ready());
    assert_eq!(mux.current_mode(), Some(PlaybackMode::Silence));
    assert_eq!(
        channel.messages(),
        vec!["playing: silence", "playing: response", "playing: silence"]
    );
    Ok(())
}

#[tokio::test]
async fn test_request_silence_withdraws_pending_reply() -> Result<()> {
    let dir = TempDir::new()?;
    let (mux, _channel) = multiplexer(reply_file(&dir)?, ScriptedOpener::new(2, 4));

    mux.next_frame().await;
    mux.request_response()?;
    mux.request_silence();

    for _ in 0..10 {
        assert!(!is_response(&mux.next_frame().await));
    }
    Ok(())
}

#[tokio::test]
async fn test_request_response_without_file_fails() -> Result<()> {
    let dir = TempDir::new()?;
    let (mux, _channel) = multiplexer(dir.path().join("missing.wav"), ScriptedOpener::new(2, 4));

    mux.next_frame().await;
    let err = mux.request_response().unwrap_err();

    assert!(matches!(err, SessionError::NoReplyAvailable { .. }));
    assert!(!mux.response_ready());
    assert_eq!(mux.current_mode(), Some(PlaybackMode::Silence));
    Ok(())
}

#[tokio::test]
async fn test_timestamps_never_regress_across_switches() -> Result<()> {
    let dir = TempDir::new()?;
    let (mux, _channel) = multiplexer(reply_file(&dir)?, ScriptedOpener::new(3, 5));

    let mut last: Option<u64> = None;
    for i in 0..60 {
        if i % 15 == 0 {
            mux.request_response()?;
        }
        let frame = mux.next_frame().await;
        if let Some(prev) = last {
            assert!(frame.pts > prev, "pts regressed at frame {}: {} <= {}", i, frame.pts, prev);
        }
        last = Some(frame.pts);
    }

    assert_eq!(mux.elapsed().await, Duration::from_millis(60 * 20));
    Ok(())
}

#[tokio::test]
async fn test_timestamps_follow_clock_across_sample_rates() -> Result<()> {
    let dir = TempDir::new()?;
    let mut opener = ScriptedOpener::new(3, 4);
    opener.response_rate = 48000;
    let (mux, _channel) = multiplexer(reply_file(&dir)?, opener);

    let mut saw_response = false;
    for i in 0..30u64 {
        if i == 5 {
            mux.request_response()?;
        }
        let frame = mux.next_frame().await;
        saw_response |= frame.sample_rate == 48000;
        // 20ms per pull regardless of the source's rate
        assert_eq!(
            frame.pts * 50,
            frame.sample_rate as u64 * i,
            "frame {} at {}Hz has pts {}",
            i,
            frame.sample_rate,
            frame.pts
        );
    }
    assert!(saw_response);
    Ok(())
}

#[tokio::test]
async fn test_slow_reply_decode_keeps_silence_flowing() -> Result<()> {
    let dir = TempDir::new()?;
    let mut opener = ScriptedOpener::new(1, 3);
    opener.response_delay = Duration::from_millis(300);
    let (mux, _channel) = multiplexer(reply_file(&dir)?, opener);

    mux.next_frame().await;
    mux.request_response()?;

    let mut silent_while_decoding = 0;
    let mut reply_started = false;
    for _ in 0..100 {
        let started = Instant::now();
        let frame = mux.next_frame().await;
        assert!(
            started.elapsed() < Duration::from_millis(150),
            "pull took {:?}",
            started.elapsed()
        );

        if is_response(&frame) {
            reply_started = true;
            break;
        }
        silent_while_decoding += 1;
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert!(reply_started);
    assert!(silent_while_decoding > 0);
    Ok(())
}

#[tokio::test]
async fn test_superseded_reply_decode_is_dropped() -> Result<()> {
    let dir = TempDir::new()?;
    let mut opener = ScriptedOpener::new(1, 3);
    opener.response_delay = Duration::from_millis(100);
    let (mux, _channel) = multiplexer(reply_file(&dir)?, opener);

    mux.next_frame().await;
    mux.request_response()?;
    mux.next_frame().await;
    mux.request_silence();

    tokio::time::sleep(Duration::from_millis(200)).await;
    for _ in 0..10 {
        assert!(!is_response(&mux.next_frame().await));
    }
    Ok(())
}

#[tokio::test]
async fn test_stalled_reply_falls_back_to_silence() -> Result<()> {
    let dir = TempDir::new()?;
    let mut opener = ScriptedOpener::new(2, 1);
    opener.stall_response = true;
    let (mux, _channel) = multiplexer(reply_file(&dir)?, opener);

    mux.request_response()?;
    assert!(is_response(&mux.next_frame().await));

    // The reply source hangs; the pull times out and silence takes over
    let frame = tokio::time::timeout(Duration::from_secs(1), mux.next_frame()).await?;
    assert!(!is_response(&frame));
    assert_eq!(mux.current_mode(), Some(PlaybackMode::Silence));
    Ok(())
}

#[tokio::test]
async fn test_unopenable_reply_falls_back_to_silence() -> Result<()> {
    let dir = TempDir::new()?;
    let mut opener = ScriptedOpener::new(2, 4);
    opener.fail_response = true;
    let (mux, channel) = multiplexer(reply_file(&dir)?, opener);

    mux.request_response()?;
    let frame = mux.next_frame().await;

    assert!(!is_response(&frame));
    assert!(!mux.response_ready());
    assert_eq!(channel.messages(), vec!["playing: silence"]);
    Ok(())
}

#[tokio::test]
async fn test_empty_sources_yield_silent_frame() -> Result<()> {
    let dir = TempDir::new()?;
    let (mux, _channel) = multiplexer(dir.path().join("missing.wav"), ScriptedOpener::new(0, 0));

    let frame = mux.next_frame().await;
    assert_eq!(frame.samples.len(), 320);
    assert!(frame.samples.iter().all(|&s| s == 0));
    assert_eq!(mux.current_mode(), None);
    Ok(())
}

#[tokio::test]
async fn test_file_opener_decodes_written_reply() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("reply.wav");
    let frames: Vec<AudioFrame> = (0..5).map(|_| common::tone_frame(16000, 1234)).collect();
    std::fs::write(&path, loqa_voice::audio::encode_wav(&frames, 16000, 1)?)?;

    let opener = FileSourceOpener {
        silence_sample_rate: 16000,
        silence_channels: 1,
        silence_length: Duration::from_millis(40),
    };
    let mux = PlaybackMultiplexer::new(path, Arc::new(opener), Duration::from_millis(200), 16000, 1);

    mux.request_response()?;
    let mut reply_frames = 0;
    for _ in 0..10 {
        let frame = mux.next_frame().await;
        if frame.samples.iter().all(|&s| s == 1234) {
            reply_frames += 1;
        }
    }
    assert_eq!(reply_frames, 5);

    mux.discard_reply();
    assert!(!mux.reply_path().exists());
    Ok(())
}

#[tokio::test]
async fn test_reply_is_converted_to_track_format() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("reply.wav");
    // 200ms of 24kHz audio
    let frames: Vec<AudioFrame> = (0..10).map(|_| common::tone_frame(24000, 1000)).collect();
    std::fs::write(&path, loqa_voice::audio::encode_wav(&frames, 24000, 1)?)?;

    let opener = FileSourceOpener {
        silence_sample_rate: 48000,
        silence_channels: 1,
        silence_length: Duration::from_millis(100),
    };
    let mux = PlaybackMultiplexer::new(path, Arc::new(opener), Duration::from_millis(500), 48000, 1);

    let mut reply_frames = 0;
    for i in 0..60u64 {
        if i == 20 {
            mux.request_response()?;
        }
        let frame = mux.next_frame().await;
        assert_eq!(frame.sample_rate, 48000);
        assert_eq!(frame.channels, 1);
        assert_eq!(frame.samples.len(), 960);
        assert_eq!(frame.pts, 960 * i);
        if frame.samples.iter().all(|&s| s == 1000) {
            reply_frames += 1;
        }
    }
    assert_eq!(reply_frames, 10);
    Ok(())
}
