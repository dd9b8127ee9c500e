use anyhow::{Context, Result};
use std::io::Cursor;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::frame::AudioFrame;

/// A flushed recording, encoded as a WAV byte stream
#[derive(Debug, Clone)]
pub struct Recording {
    pub wav: Vec<u8>,
    pub frame_count: usize,
    pub duration: Duration,
    /// Frames refused for a format mismatch or the length cap
    pub dropped_frames: usize,
}

/// Accumulates inbound audio while a recording is active.
///
/// Frames are kept in arrival order and only encoded when the recording
/// stops. While inactive, appended frames are silently discarded.
pub struct CaptureBuffer {
    frames: Vec<AudioFrame>,
    active: bool,
    /// Format used when flushing an empty buffer
    default_sample_rate: u32,
    default_channels: u16,
    /// Samples per channel after which new frames are dropped
    max_samples: usize,
    buffered_samples: usize,
    dropped_frames: usize,
}

impl CaptureBuffer {
    pub fn new(sample_rate: u32, channels: u16, max_duration: Duration) -> Self {
        let max_samples = (max_duration.as_secs_f64() * sample_rate as f64) as usize;

        Self {
            frames: Vec::new(),
            active: false,
            default_sample_rate: sample_rate,
            default_channels: channels,
            max_samples,
            buffered_samples: 0,
            dropped_frames: 0,
        }
    }

    /// Clear anything buffered and start accepting frames.
    pub fn start(&mut self) {
        if !self.frames.is_empty() {
            debug!("Discarding {} residual frames", self.frames.len());
        }
        self.frames.clear();
        self.buffered_samples = 0;
        self.dropped_frames = 0;
        self.active = true;
    }

    /// Drop everything buffered and stop accepting frames.
    pub fn reset(&mut self) {
        self.frames.clear();
        self.buffered_samples = 0;
        self.dropped_frames = 0;
        self.active = false;
    }

    pub fn is_recording(&self) -> bool {
        self.active
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Append a frame if recording. Returns whether the frame was kept.
    pub fn append(&mut self, frame: AudioFrame) -> bool {
        if !self.active {
            return false;
        }

        if let Some(first) = self.frames.first() {
            if first.sample_rate != frame.sample_rate || first.channels != frame.channels {
                warn!(
                    "Frame format mismatch: expected {}Hz/{}ch, got {}Hz/{}ch. Dropping frame.",
                    first.sample_rate, first.channels, frame.sample_rate, frame.channels
                );
                self.dropped_frames += 1;
                return false;
            }
        }

        let incoming = frame.sample_count();
        if self.buffered_samples + incoming > self.max_samples {
            if self.dropped_frames == 0 {
                warn!("Recording limit reached, dropping further frames");
            }
            self.dropped_frames += 1;
            return false;
        }

        self.buffered_samples += incoming;
        self.frames.push(frame);
        true
    }

    /// Stop recording, encode everything buffered and clear the buffer.
    ///
    /// The WAV header takes the format of the first buffered frame.
    /// An empty buffer yields a valid WAV stream with zero samples.
    pub fn stop_and_flush(&mut self) -> Result<Recording> {
        self.active = false;

        let (sample_rate, channels) = self
            .frames
            .first()
            .map(|f| (f.sample_rate, f.channels))
            .unwrap_or((self.default_sample_rate, self.default_channels));

        let frames = std::mem::take(&mut self.frames);
        let frame_count = frames.len();
        let wav = encode_wav(&frames, sample_rate, channels)?;
        let duration = Duration::from_secs_f64(self.buffered_samples as f64 / sample_rate.max(1) as f64);

        info!(
            "Flushed recording: {} frames, {:.2}s, {} bytes ({} dropped)",
            frame_count,
            duration.as_secs_f64(),
            wav.len(),
            self.dropped_frames
        );

        let dropped_frames = std::mem::take(&mut self.dropped_frames);
        self.buffered_samples = 0;

        Ok(Recording {
            wav,
            frame_count,
            duration,
            dropped_frames,
        })
    }
}

/// Encode frames as a 16-bit PCM WAV byte stream.
pub fn encode_wav(frames: &[AudioFrame], sample_rate: u32, channels: u16) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .context("Failed to create WAV writer")?;

        for frame in frames {
            for &sample in &frame.samples {
                writer
                    .write_sample(sample)
                    .context("Failed to write sample to WAV")?;
            }
        }

        writer.finalize().context("Failed to finalize WAV stream")?;
    }

    Ok(cursor.into_inner())
}
