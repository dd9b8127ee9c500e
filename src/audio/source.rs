use anyhow::{Context, Result};
use std::path::Path;
use std::time::Duration;

use super::file::AudioFile;
use super::frame::{samples_per_frame, AudioFrame, FRAME_DURATION};
use super::multiplexer::PlaybackMode;

/// A finite stream of outbound audio frames.
#[async_trait::async_trait]
pub trait PlaybackSource: Send {
    /// Next frame, or `None` once the source is exhausted.
    async fn next_frame(&mut self) -> Option<AudioFrame>;

    /// Source name for logging
    fn name(&self) -> &str;
}

/// Opens the source backing a playback mode.
#[async_trait::async_trait]
pub trait SourceOpener: Send + Sync {
    async fn open(&self, mode: PlaybackMode, reply_path: &Path) -> Result<Box<dyn PlaybackSource>>;
}

/// A fixed-length run of digital silence
pub struct SilenceSource {
    sample_rate: u32,
    channels: u16,
    remaining: usize,
    pts: u64,
}

impl SilenceSource {
    pub fn new(sample_rate: u32, channels: u16, length: Duration) -> Self {
        let frames = (length.as_millis() / FRAME_DURATION.as_millis()).max(1) as usize;
        Self {
            sample_rate,
            channels,
            remaining: frames,
            pts: 0,
        }
    }
}

#[async_trait::async_trait]
impl PlaybackSource for SilenceSource {
    async fn next_frame(&mut self) -> Option<AudioFrame> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;

        let frame = AudioFrame::silent(self.sample_rate, self.channels, self.pts);
        self.pts += frame.sample_count() as u64;
        Some(frame)
    }

    fn name(&self) -> &str {
        "silence"
    }
}

/// Plays a decoded reply once, in 20ms frames
pub struct ReplySource {
    samples: Vec<i16>,
    sample_rate: u32,
    channels: u16,
    position: usize,
    pts: u64,
}

impl ReplySource {
    pub fn new(audio: AudioFile) -> Self {
        Self {
            samples: audio.samples,
            sample_rate: audio.sample_rate,
            channels: audio.channels,
            position: 0,
            pts: 0,
        }
    }
}

#[async_trait::async_trait]
impl PlaybackSource for ReplySource {
    async fn next_frame(&mut self) -> Option<AudioFrame> {
        if self.position >= self.samples.len() {
            return None;
        }

        let frame_len = samples_per_frame(self.sample_rate, self.channels);
        let end = (self.position + frame_len).min(self.samples.len());
        let mut samples = self.samples[self.position..end].to_vec();
        // Pad the tail so every frame has the same length
        samples.resize(frame_len, 0);
        self.position = end;

        let frame = AudioFrame {
            samples,
            sample_rate: self.sample_rate,
            channels: self.channels,
            pts: self.pts,
        };
        self.pts += frame.sample_count() as u64;
        Some(frame)
    }

    fn name(&self) -> &str {
        "response"
    }
}

/// Generated silence, or the reply file decoded from disk. Replies are
/// converted to the silence format so the outbound track never changes
/// sample rate or channel count.
pub struct FileSourceOpener {
    pub silence_sample_rate: u32,
    pub silence_channels: u16,
    pub silence_length: Duration,
}

#[async_trait::async_trait]
impl SourceOpener for FileSourceOpener {
    async fn open(&self, mode: PlaybackMode, reply_path: &Path) -> Result<Box<dyn PlaybackSource>> {
        match mode {
            PlaybackMode::Silence => Ok(Box::new(SilenceSource::new(
                self.silence_sample_rate,
                self.silence_channels,
                self.silence_length,
            ))),
            PlaybackMode::Response => {
                let path = reply_path.to_path_buf();
                let (rate, channels) = (self.silence_sample_rate, self.silence_channels);
                let audio = tokio::task::spawn_blocking(move || {
                    AudioFile::open(path).map(|audio| audio.into_format(rate, channels))
                })
                .await
                .context("Reply decoder task panicked")??;
                Ok(Box::new(ReplySource::new(audio)))
            }
        }
    }
}
