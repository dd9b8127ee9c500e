// Shared fakes for integration tests: an in-memory control channel that
// records every message, and collaborators that answer from fixed values.

#![allow(dead_code)]

use anyhow::{anyhow, Result};
use loqa_voice::audio::{encode_wav, AudioFrame};
use loqa_voice::dispatch::Dispatcher;
use loqa_voice::error::Stage;
use loqa_voice::pipeline::{
    AssistantTurn, ImageDescriber, Pipeline, Reasoner, Synthesizer, Transcriber, Turn,
};
use loqa_voice::protocol::{OutboundMessage, UploadedImage};
use loqa_voice::session::{Session, SessionConfig};
use loqa_voice::transport::ControlChannel;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// Control channel that keeps every wire string it was asked to send
#[derive(Default)]
pub struct RecordingChannel {
    messages: Mutex<Vec<String>>,
}

impl RecordingChannel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }

    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.messages.lock().unwrap())
    }
}

#[async_trait::async_trait]
impl ControlChannel for RecordingChannel {
    async fn send(&self, message: OutboundMessage) -> Result<()> {
        self.messages.lock().unwrap().push(message.to_string());
        Ok(())
    }
}

/// All four collaborators in one, answering from fixed values
pub struct FakeServices {
    pub transcript: String,
    pub reply: AssistantTurn,
    pub fail: Option<Stage>,
    /// Delay before the synthesized file is written
    pub synth_delay: Duration,
    pub presets: Mutex<Vec<Option<String>>>,
    pub histories: Mutex<Vec<Vec<Turn>>>,
    pub images: Mutex<Vec<UploadedImage>>,
}

impl FakeServices {
    pub fn replying(transcript: &str, reply: &str) -> Self {
        Self {
            transcript: transcript.to_string(),
            reply: AssistantTurn::Reply {
                text: reply.to_string(),
            },
            fail: None,
            synth_delay: Duration::ZERO,
            presets: Mutex::new(Vec::new()),
            histories: Mutex::new(Vec::new()),
            images: Mutex::new(Vec::new()),
        }
    }

    pub fn with_reply(mut self, reply: AssistantTurn) -> Self {
        self.reply = reply;
        self
    }

    pub fn failing(mut self, stage: Stage) -> Self {
        self.fail = Some(stage);
        self
    }

    fn check(&self, stage: Stage) -> Result<()> {
        match self.fail {
            Some(failing) if failing == stage => Err(anyhow!("{} service unavailable", stage)),
            _ => Ok(()),
        }
    }
}

#[async_trait::async_trait]
impl Transcriber for FakeServices {
    async fn transcribe(&self, _session_id: &str, wav: &[u8]) -> Result<String> {
        self.check(Stage::Transcription)?;
        assert_eq!(&wav[0..4], b"RIFF");
        Ok(self.transcript.clone())
    }
}

#[async_trait::async_trait]
impl Reasoner for FakeServices {
    async fn respond(&self, _session_id: &str, history: &[Turn], _request: &Turn) -> Result<AssistantTurn> {
        self.check(Stage::Reasoning)?;
        self.histories.lock().unwrap().push(history.to_vec());
        Ok(self.reply.clone())
    }
}

#[async_trait::async_trait]
impl Synthesizer for FakeServices {
    async fn synthesize(
        &self,
        _session_id: &str,
        _text: &str,
        voice_preset: Option<&str>,
        output: &Path,
    ) -> Result<()> {
        self.presets
            .lock()
            .unwrap()
            .push(voice_preset.map(str::to_string));
        self.check(Stage::Synthesis)?;
        tokio::time::sleep(self.synth_delay).await;

        let frames: Vec<AudioFrame> = (0..10).map(|_| tone_frame(16000, 1000)).collect();
        std::fs::write(output, encode_wav(&frames, 16000, 1)?)?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl ImageDescriber for FakeServices {
    async fn describe_and_store(&self, _session_id: &str, image: &UploadedImage) -> Result<()> {
        self.check(Stage::ImageDescription)?;
        self.images.lock().unwrap().push(image.clone());
        Ok(())
    }
}

pub fn pipeline(services: &Arc<FakeServices>) -> Pipeline {
    Pipeline {
        transcriber: services.clone(),
        reasoner: services.clone(),
        synthesizer: services.clone(),
        image_describer: services.clone(),
    }
}

/// A 20ms frame filled with one sample value
pub fn tone_frame(sample_rate: u32, value: i16) -> AudioFrame {
    let mut frame = AudioFrame::silent(sample_rate, 1, 0);
    frame.samples.iter_mut().for_each(|s| *s = value);
    frame
}

/// Session settings writing into `dir`, capturing 16kHz mono
pub fn session_config(dir: &TempDir) -> SessionConfig {
    let mut config = SessionConfig::default();
    config.reply_path = dir.path().join(format!("{}.wav", config.session_id));
    config.input_sample_rate = 16000;
    config.input_channels = 1;
    config.silence_sample_rate = 16000;
    config.silence_clip = Duration::from_millis(100);
    config
}

pub struct Harness {
    pub session: Session,
    pub channel: Arc<RecordingChannel>,
    pub services: Arc<FakeServices>,
    pub dispatcher: Arc<Dispatcher>,
    pub dir: TempDir,
}

impl Harness {
    pub fn new(services: FakeServices) -> Result<Self> {
        Self::with_config(services, |_| {})
    }

    pub fn with_config(services: FakeServices, tweak: impl FnOnce(&mut SessionConfig)) -> Result<Self> {
        let dir = TempDir::new()?;
        let mut config = session_config(&dir);
        tweak(&mut config);

        let services = Arc::new(services);
        let dispatcher = Arc::new(Dispatcher::new(Arc::new(pipeline(&services)), 1)?);
        let channel = RecordingChannel::new();
        let session = Session::new(config, channel.clone(), dispatcher.clone());

        Ok(Self {
            session,
            channel,
            services,
            dispatcher,
            dir,
        })
    }

    /// Record `frames` frames, stop, and apply the dispatcher's result.
    pub async fn voice_turn(&mut self, frames: usize) -> Result<()> {
        self.session.handle_message("start_recording").await;
        {
            let capture = self.session.capture();
            let mut capture = capture.lock().await;
            for i in 0..frames {
                capture.append(tone_frame(16000, i as i16));
            }
        }
        self.session.handle_message("stop_recording").await;

        let event = tokio::time::timeout(Duration::from_secs(5), self.session.next_dispatch_event())
            .await?
            .ok_or_else(|| anyhow!("dispatcher channel closed"))?;
        self.session.handle_dispatch_event(event).await;
        Ok(())
    }
}
