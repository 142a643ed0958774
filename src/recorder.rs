use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::chat::now_millis;
use crate::error::{Error, Result};
use crate::session::SessionStore;
use crate::storage::ChatRepository;

/// Raw capture produced by a backend: mono 16-bit PCM and its sample rate.
pub struct Recording {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
}

/// Microphone access. `start` acquires the device; the returned handle owns
/// it until `stop`, which must release it unconditionally, even when capture
/// failed.
#[async_trait]
pub trait CaptureBackend: Send + Sync {
    async fn start(&self) -> Result<Box<dyn CaptureHandle>>;
}

#[async_trait]
pub trait CaptureHandle: Send {
    async fn stop(self: Box<Self>) -> Result<Recording>;
}

/// Live speech recognition running alongside capture.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn start(&self) -> Result<()>;
    async fn stop(&self) -> Result<Option<String>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderState {
    Idle,
    Requesting,
    Recording,
    Stopping,
}

/// Records microphone audio and hands `(wav path, transcript)` to the
/// session store's audio-send path on stop.
pub struct Recorder {
    backend: Arc<dyn CaptureBackend>,
    transcriber: Option<Arc<dyn Transcriber>>,
    recording: Arc<AtomicBool>,
    active: Mutex<Option<Box<dyn CaptureHandle>>>,
    state: Mutex<RecorderState>,
}

impl Recorder {
    /// `recording` is the session-wide capture flag, shared so the rest of
    /// the app can observe it.
    pub fn new(
        backend: Arc<dyn CaptureBackend>,
        transcriber: Option<Arc<dyn Transcriber>>,
        recording: Arc<AtomicBool>,
    ) -> Self {
        Self {
            backend,
            transcriber,
            recording,
            active: Mutex::new(None),
            state: Mutex::new(RecorderState::Idle),
        }
    }

    pub async fn state(&self) -> RecorderState {
        *self.state.lock().await
    }

    /// Starts capture when idle, stops and sends when recording.
    pub async fn toggle_recording<R: ChatRepository>(&self, session: &SessionStore<R>) {
        if self.recording.load(Ordering::SeqCst) {
            self.stop_recording(session).await;
        } else {
            self.start_recording().await;
        }
    }

    /// Acquires the microphone. Failure (permission denied, unsupported
    /// device) leaves the recorder idle with the flag cleared; it is
    /// reported, never propagated.
    pub async fn start_recording(&self) {
        *self.state.lock().await = RecorderState::Requesting;
        match self.backend.start().await {
            Ok(handle) => {
                *self.active.lock().await = Some(handle);
                if let Some(transcriber) = &self.transcriber {
                    if let Err(e) = transcriber.start().await {
                        warn!(error = %e, "live transcription unavailable");
                    }
                }
                self.recording.store(true, Ordering::SeqCst);
                *self.state.lock().await = RecorderState::Recording;
            }
            Err(e) => {
                error!(error = %e, "could not start recording");
                self.recording.store(false, Ordering::SeqCst);
                *self.state.lock().await = RecorderState::Idle;
            }
        }
    }

    /// Stops capture, releases the device, encodes the take as WAV, and
    /// hands it to the session store.
    pub async fn stop_recording<R: ChatRepository>(&self, session: &SessionStore<R>) {
        *self.state.lock().await = RecorderState::Stopping;
        let handle = self.active.lock().await.take();
        let Some(handle) = handle else {
            self.recording.store(false, Ordering::SeqCst);
            *self.state.lock().await = RecorderState::Idle;
            return;
        };
        // stop consumes the handle and releases the device on every path
        let recording = handle.stop().await;
        self.recording.store(false, Ordering::SeqCst);

        let transcript = match &self.transcriber {
            Some(transcriber) => match transcriber.stop().await {
                Ok(text) => text,
                Err(e) => {
                    warn!(error = %e, "transcription failed");
                    None
                }
            },
            None => None,
        };

        match recording {
            Ok(take) => {
                let path = std::env::temp_dir().join(format!("charla_rec_{}.wav", now_millis()));
                match write_wav(&path, &take) {
                    Ok(()) => {
                        info!(path = %path.display(), samples = take.samples.len(), "recording finished");
                        if let Err(e) =
                            session.send_audio_message(&path.to_string_lossy(), transcript).await
                        {
                            error!(error = %e, "failed to send audio message");
                        }
                    }
                    Err(e) => error!(error = %e, "failed to encode recording"),
                }
            }
            Err(e) => error!(error = %e, "capture failed"),
        }
        *self.state.lock().await = RecorderState::Idle;
    }
}

fn write_wav(path: &Path, take: &Recording) -> Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: take.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer =
        hound::WavWriter::create(path, spec).map_err(|e| Error::Media(e.to_string()))?;
    for sample in &take.samples {
        writer.write_sample(*sample).map_err(|e| Error::Media(e.to_string()))?;
    }
    writer.finalize().map_err(|e| Error::Media(e.to_string()))?;
    Ok(())
}

/// Capture path for a prerecorded WAV file; stands in where no microphone
/// backend is wired up.
pub struct WavFileBackend {
    pub path: PathBuf,
}

struct WavFileHandle {
    path: PathBuf,
}

#[async_trait]
impl CaptureBackend for WavFileBackend {
    async fn start(&self) -> Result<Box<dyn CaptureHandle>> {
        if !self.path.exists() {
            return Err(Error::Media(format!("no such file: {}", self.path.display())));
        }
        Ok(Box::new(WavFileHandle { path: self.path.clone() }))
    }
}

#[async_trait]
impl CaptureHandle for WavFileHandle {
    async fn stop(self: Box<Self>) -> Result<Recording> {
        let mut reader =
            hound::WavReader::open(&self.path).map_err(|e| Error::Media(e.to_string()))?;
        let sample_rate = reader.spec().sample_rate;
        let samples = reader
            .samples::<i16>()
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::Media(e.to_string()))?;
        Ok(Recording { samples, sample_rate })
    }
}
