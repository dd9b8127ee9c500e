use std::time::Duration;

/// Duration of one media frame on both tracks
pub const FRAME_DURATION: Duration = Duration::from_millis(20);

/// Number of frames per second at [`FRAME_DURATION`]
pub const FRAMES_PER_SECOND: u32 = 50;

/// Audio sample data (16-bit PCM, interleaved)
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    /// Raw audio samples (i16 PCM, interleaved)
    pub samples: Vec<i16>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels
    pub channels: u16,
    /// Presentation timestamp, in samples per channel at `sample_rate`
    pub pts: u64,
}

impl AudioFrame {
    /// A 20ms frame of digital silence.
    pub fn silent(sample_rate: u32, channels: u16, pts: u64) -> Self {
        Self {
            samples: vec![0; samples_per_frame(sample_rate, channels)],
            sample_rate,
            channels,
            pts,
        }
    }

    /// Decode little-endian 16-bit PCM as received from the transport.
    pub fn from_le_bytes(bytes: &[u8], sample_rate: u32, channels: u16, pts: u64) -> Self {
        let samples = bytes
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect();

        Self {
            samples,
            sample_rate,
            channels,
            pts,
        }
    }

    pub fn to_le_bytes(&self) -> Vec<u8> {
        self.samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    /// Samples per channel
    pub fn sample_count(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }

    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.sample_count() as f64 / self.sample_rate as f64)
    }
}

/// Interleaved samples in one 20ms frame.
pub fn samples_per_frame(sample_rate: u32, channels: u16) -> usize {
    (sample_rate / FRAMES_PER_SECOND) as usize * channels as usize
}
