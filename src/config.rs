use anyhow::Result;
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub session: SessionSettings,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub nats: NatsConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "loqa-voice".to_string(),
            http: HttpConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Sample rate of inbound PCM from the client
    pub input_sample_rate: u32,
    pub input_channels: u16,
    /// Upper bound on a single recording; later frames are dropped
    pub max_recording_secs: u64,
    /// Length of one silence run before the multiplexer re-evaluates
    pub silence_clip_ms: u64,
    /// Bounded wait for a single frame from the open playback source
    pub source_timeout_ms: u64,
    pub silence_sample_rate: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input_sample_rate: 48000,
            input_channels: 1,
            max_recording_secs: 120,
            silence_clip_ms: 500,
            source_timeout_ms: 20,
            silence_sample_rate: 48000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Directory holding one synthesized reply per session
    pub replies_dir: PathBuf,
    /// Maximum number of turns kept in history (0 = unbounded)
    pub history_limit: usize,
    /// Whether list-shaped tool results are appended to history
    pub tool_results_in_history: bool,
    pub default_voice_preset: Option<String>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            replies_dir: std::env::temp_dir().join("loqa-voice"),
            history_limit: 0,
            tool_results_in_history: false,
            default_voice_preset: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub worker_threads: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self { worker_threads: 2 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NatsConfig {
    pub url: String,
    pub request_timeout_secs: u64,
    pub transcribe_subject: String,
    pub reason_subject: String,
    pub synthesize_subject: String,
    pub describe_image_subject: String,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".to_string(),
            request_timeout_secs: 60,
            transcribe_subject: "stt.transcribe".to_string(),
            reason_subject: "agent.reply".to_string(),
            synthesize_subject: "tts.synthesize".to_string(),
            describe_image_subject: "vision.describe".to_string(),
        }
    }
}

impl Config {
    /// Load from `path` (any extension `config` understands), then apply
    /// `LOQA_VOICE__SECTION__KEY` environment overrides.
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(config::Environment::with_prefix("LOQA_VOICE").separator("__"))
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}
