use serde::{Deserialize, Serialize};

/// Which text-to-speech engine renders bot replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TtsEngine {
    /// Remote synthesis endpoint, then local playback.
    #[default]
    Api,
    /// Platform speech synthesis.
    Local,
}

/// Runtime toggles shared by the session store, providers, and speech output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Settings {
    pub audio_responses: bool,
    pub tts_engine: TtsEngine,
    pub use_hardcoded_responses: bool,
}

impl Settings {
    pub fn toggle_audio_responses(&mut self) {
        self.audio_responses = !self.audio_responses;
    }

    pub fn toggle_response_mode(&mut self) {
        self.use_hardcoded_responses = !self.use_hardcoded_responses;
    }

    pub fn set_tts_engine(&mut self, engine: TtsEngine) {
        self.tts_engine = engine;
    }
}

/// Remote API endpoint configuration. The key is sent as a static
/// `x-app-auth` header on every request.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub base_url: String,
    pub api_key: Option<String>,
}

impl ApiConfig {
    pub fn from_env() -> Self {
        let base_url = std::env::var("CHARLA_API_BASE_URL")
            .unwrap_or_else(|_| "http://localhost:8000".into());
        let api_key = std::env::var("CHARLA_API_KEY").ok();
        Self { base_url, api_key }
    }

    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self { base_url: base_url.into(), api_key }
    }
}

/// Whether live transcription should run alongside audio capture.
pub fn transcript_enabled_from_env() -> bool {
    std::env::var("CHARLA_TRANSCRIPT_AUDIO")
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_initial_state() {
        let s = Settings::default();
        assert!(!s.audio_responses);
        assert!(!s.use_hardcoded_responses);
        assert_eq!(s.tts_engine, TtsEngine::Api);
    }

    #[test]
    fn toggles_flip_state() {
        let mut s = Settings::default();
        s.toggle_audio_responses();
        assert!(s.audio_responses);
        s.toggle_response_mode();
        assert!(s.use_hardcoded_responses);
        s.set_tts_engine(TtsEngine::Local);
        assert_eq!(s.tts_engine, TtsEngine::Local);
    }

    #[test]
    fn tts_engine_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&TtsEngine::Api).unwrap(), "\"api\"");
        assert_eq!(serde_json::to_string(&TtsEngine::Local).unwrap(), "\"local\"");
    }
}
