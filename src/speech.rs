use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::settings::{ApiConfig, TtsEngine};

/// Plays an encoded audio payload, resolving at natural end of playback.
#[async_trait]
pub trait AudioSink: Send + Sync {
    async fn play(&self, audio: &[u8]) -> Result<()>;
}

/// Headless sink for environments without an audio device.
pub struct NullSink;

#[async_trait]
impl AudioSink for NullSink {
    async fn play(&self, audio: &[u8]) -> Result<()> {
        tracing::debug!(bytes = audio.len(), "no audio sink configured, dropping payload");
        Ok(())
    }
}

/// Platform speech synthesis, resolving when playback finishes.
#[async_trait]
pub trait SpeechSynthesis: Send + Sync {
    async fn speak(&self, text: &str, lang: &str, rate: f32) -> Result<()>;
}

/// Stand-in for platforms without a local voice.
pub struct UnsupportedSynthesis;

#[async_trait]
impl SpeechSynthesis for UnsupportedSynthesis {
    async fn speak(&self, _text: &str, _lang: &str, _rate: f32) -> Result<()> {
        Err(Error::Media("platform speech synthesis not available".into()))
    }
}

#[derive(Serialize)]
struct SynthesizeRequest<'a> {
    text: &'a str,
    slow: bool,
    speed: f32,
    voice: &'a str,
}

/// Converts bot reply text into audible playback. At most one playback runs
/// process-wide: a second `speak` arriving mid-playback is dropped, never
/// queued or interrupted.
pub struct SpeechService {
    client: reqwest::Client,
    config: ApiConfig,
    sink: Arc<dyn AudioSink>,
    platform: Arc<dyn SpeechSynthesis>,
    playing: AtomicBool,
}

/// Clears the playback flag on every exit path.
struct PlayingGuard<'a>(&'a AtomicBool);

impl Drop for PlayingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl SpeechService {
    pub fn new(
        config: ApiConfig,
        sink: Arc<dyn AudioSink>,
        platform: Arc<dyn SpeechSynthesis>,
    ) -> Self {
        Self { client: reqwest::Client::new(), config, sink, platform, playing: AtomicBool::new(false) }
    }

    /// Headless service: remote synthesis is discarded, local synthesis is
    /// unavailable.
    pub fn headless(config: ApiConfig) -> Self {
        Self::new(config, Arc::new(NullSink), Arc::new(UnsupportedSynthesis))
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }

    /// Speaks `text` through the selected engine and waits for playback to
    /// finish. Empty text and calls made while another playback is in flight
    /// are no-ops.
    pub async fn speak(&self, text: &str, engine: TtsEngine) -> Result<()> {
        if text.is_empty() {
            return Ok(());
        }
        if self.playing.swap(true, Ordering::SeqCst) {
            tracing::debug!("playback already in progress, dropping speak request");
            return Ok(());
        }
        let _guard = PlayingGuard(&self.playing);
        match engine {
            TtsEngine::Api => self.synthesize_and_play(text).await,
            TtsEngine::Local => self.platform.speak(text, "es-ES", 1.0).await,
        }
    }

    async fn synthesize_and_play(&self, text: &str) -> Result<()> {
        let url = format!("{}/synthesize", self.config.base_url.trim_end_matches('/'));
        let mut rb = self.client.post(url).json(&SynthesizeRequest {
            text,
            slow: false,
            speed: 99.0,
            voice: "es_ar_2",
        });
        if let Some(key) = &self.config.api_key {
            rb = rb.header("x-app-auth", key);
        }
        let resp = rb.send().await?.error_for_status()?;
        let audio = resp.bytes().await?;
        if audio.is_empty() {
            return Err(Error::MalformedResponse("empty synthesis payload".into()));
        }
        self.sink.play(&audio).await
    }
}
