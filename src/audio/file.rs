use anyhow::{Context, Result};
use std::fs::File;
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, info, warn};

/// A fully decoded audio file (interleaved i16 PCM)
pub struct AudioFile {
    pub path: String,
    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<i16>,
}

impl AudioFile {
    /// Decode any format symphonia supports (WAV, MP3, FLAC, OGG, ...).
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening audio file: {}", path.display());

        let file = File::open(path)
            .with_context(|| format!("Failed to open audio file: {}", path.display()))?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .context("Unsupported audio format")?;
        let mut format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .context("No decodable audio track")?;
        let track_id = track.id;
        let mut sample_rate = track.codec_params.sample_rate.unwrap_or(0);
        let mut channels = track
            .codec_params
            .channels
            .map(|c| c.count() as u16)
            .unwrap_or(0);

        let mut decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .context("Failed to create audio decoder")?;

        let mut samples: Vec<i16> = Vec::new();

        loop {
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    break;
                }
                Err(SymphoniaError::ResetRequired) => break,
                Err(e) => return Err(e).context("Failed to read audio packet"),
            };

            if packet.track_id() != track_id {
                continue;
            }

            match decoder.decode(&packet) {
                Ok(decoded) => {
                    let spec = *decoded.spec();
                    sample_rate = spec.rate;
                    channels = spec.channels.count() as u16;

                    let mut buffer = SampleBuffer::<i16>::new(decoded.capacity() as u64, spec);
                    buffer.copy_interleaved_ref(decoded);
                    samples.extend_from_slice(buffer.samples());
                }
                Err(SymphoniaError::DecodeError(e)) => {
                    warn!("Skipping undecodable packet: {}", e);
                }
                Err(e) => return Err(e).context("Failed to decode audio packet"),
            }
        }

        if sample_rate == 0 || channels == 0 {
            anyhow::bail!("Audio file has no usable format: {}", path.display());
        }

        let duration_seconds = samples.len() as f64 / (sample_rate as f64 * channels as f64);

        info!(
            "Audio file loaded: {:.1}s, {}Hz, {} channels, {} samples",
            duration_seconds,
            sample_rate,
            channels,
            samples.len()
        );

        Ok(Self {
            path: path.display().to_string(),
            duration_seconds,
            sample_rate,
            channels,
            samples,
        })
    }

    /// Convert to `sample_rate`/`channels`. Channels are averaged down to
    /// mono, linearly resampled, then duplicated up to `channels`.
    pub fn into_format(self, sample_rate: u32, channels: u16) -> Self {
        let channels = channels.max(1);
        if self.sample_rate == sample_rate && self.channels == channels {
            return self;
        }

        debug!(
            "Converting {}: {}Hz/{}ch -> {}Hz/{}ch",
            self.path, self.sample_rate, self.channels, sample_rate, channels
        );

        let mono = downmix(&self.samples, self.channels);
        let resampled = resample_linear(&mono, self.sample_rate, sample_rate);
        let samples: Vec<i16> = if channels == 1 {
            resampled
        } else {
            resampled
                .iter()
                .flat_map(|&s| std::iter::repeat(s).take(channels as usize))
                .collect()
        };
        let duration_seconds =
            (samples.len() / channels as usize) as f64 / sample_rate.max(1) as f64;

        Self {
            path: self.path,
            duration_seconds,
            sample_rate,
            channels,
            samples,
        }
    }
}

fn downmix(samples: &[i16], channels: u16) -> Vec<i16> {
    if channels <= 1 {
        return samples.to_vec();
    }
    samples
        .chunks(channels as usize)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|&s| s as i32).sum();
            (sum / frame.len() as i32) as i16
        })
        .collect()
}

fn resample_linear(input: &[i16], in_rate: u32, out_rate: u32) -> Vec<i16> {
    if input.is_empty() || in_rate == out_rate || in_rate == 0 || out_rate == 0 {
        return input.to_vec();
    }

    let out_len = (input.len() as u64 * out_rate as u64 / in_rate as u64) as usize;
    let last = input.len() - 1;

    (0..out_len)
        .map(|i| {
            let pos = i as u64 * in_rate as u64;
            let idx = (pos / out_rate as u64) as usize;
            let frac = (pos % out_rate as u64) as f32 / out_rate as f32;
            let s0 = input[idx.min(last)] as f32;
            let s1 = input[(idx + 1).min(last)] as f32;
            (s0 + (s1 - s0) * frac).round() as i16
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::capture::encode_wav;
    use crate::audio::frame::AudioFrame;

    #[test]
    fn test_decodes_wav_written_by_capture() -> Result<()> {
        let dir = tempfile::TempDir::new()?;
        let path = dir.path().join("reply.wav");

        let frames: Vec<AudioFrame> = (0..10)
            .map(|i| AudioFrame {
                samples: vec![i as i16 * 100; 480],
                sample_rate: 24000,
                channels: 1,
                pts: 0,
            })
            .collect();
        std::fs::write(&path, encode_wav(&frames, 24000, 1)?)?;

        let audio = AudioFile::open(&path)?;
        assert_eq!(audio.sample_rate, 24000);
        assert_eq!(audio.channels, 1);
        assert_eq!(audio.samples.len(), 4800);
        assert_eq!(audio.samples[480], 100);
        assert!((audio.duration_seconds - 0.2).abs() < 1e-9);
        Ok(())
    }

    #[test]
    fn test_into_format_resamples_and_downmixes() {
        let audio = AudioFile {
            path: "mem".into(),
            duration_seconds: 0.02,
            sample_rate: 24000,
            channels: 2,
            // Left 1000, right 3000
            samples: [1000i16, 3000].repeat(480),
        };

        let converted = audio.into_format(48000, 1);
        assert_eq!(converted.sample_rate, 48000);
        assert_eq!(converted.channels, 1);
        assert_eq!(converted.samples.len(), 960);
        assert!(converted.samples.iter().all(|&s| s == 2000));
        assert!((converted.duration_seconds - 0.02).abs() < 1e-9);
    }

    #[test]
    fn test_into_format_same_format_is_unchanged() {
        let audio = AudioFile {
            path: "mem".into(),
            duration_seconds: 0.0,
            sample_rate: 16000,
            channels: 1,
            samples: vec![1, 2, 3],
        };
        assert_eq!(audio.into_format(16000, 1).samples, vec![1, 2, 3]);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(AudioFile::open("/nonexistent/reply.wav").is_err());
    }
}
