//! Pipeline configuration, loaded from TOML and overridden by environment.
//!
//! ```toml
//! [capture]
//! chunk_samples = 4096
//!
//! [dialogue]
//! endpoint = "http://127.0.0.1:3000/api/chat"
//! timeout_ms = 30000
//!
//! [stt]
//! engine = "openai"
//!
//! [tts]
//! engine = "tone"
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::capture::CaptureConstraints;
use crate::error::VoiceError;

/// Environment variable overriding [`DialogueSettings::endpoint`].
pub const ENV_DIALOGUE_URL: &str = "VOXLOOP_DIALOGUE_URL";

/// Environment variable supplying the API key for hosted engines.
pub const ENV_OPENAI_API_KEY: &str = "OPENAI_API_KEY";

const DEFAULT_OPENAI_BASE: &str = "https://api.openai.com/v1";

/// Top-level pipeline configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub capture: CaptureSettings,
    pub workers: WorkerSettings,
    pub dialogue: DialogueSettings,
    pub stt: SttSettings,
    pub tts: TtsSettings,
}

/// Microphone capture settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    /// Samples per emitted [`AudioChunk`](crate::capture::AudioChunk).
    pub chunk_samples: usize,

    /// Processing requested from the input device.
    pub constraints: CaptureConstraints,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            chunk_samples: 4096,
            constraints: CaptureConstraints::default(),
        }
    }
}

/// Worker runtime settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    /// Capacity of each worker's request and reply channels.
    pub channel_capacity: usize,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self { channel_capacity: 8 }
    }
}

/// Dialogue endpoint settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DialogueSettings {
    /// URL of the `POST {message}` endpoint.
    pub endpoint: String,

    /// Bounded wait for one exchange.
    pub timeout_ms: u64,
}

impl DialogueSettings {
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for DialogueSettings {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:3000/api/chat".to_string(),
            timeout_ms: 30_000,
        }
    }
}

/// Which STT engine runs inside the worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SttEngineKind {
    /// Deterministic transcripts from [`SttSettings::script`].
    #[default]
    Scripted,
    /// Hosted Whisper via `/audio/transcriptions`.
    OpenAi,
}

/// STT engine settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SttSettings {
    pub engine: SttEngineKind,
    pub model: String,
    pub api_base: String,
    pub api_key: Option<String>,

    /// Transcripts returned in order by the scripted engine; the last repeats.
    pub script: Vec<String>,

    /// Artificial processing time of the scripted engine.
    pub latency_ms: u64,
}

impl Default for SttSettings {
    fn default() -> Self {
        Self {
            engine: SttEngineKind::Scripted,
            model: "whisper-1".to_string(),
            api_base: DEFAULT_OPENAI_BASE.to_string(),
            api_key: None,
            script: vec!["hello".to_string()],
            latency_ms: 0,
        }
    }
}

/// Which TTS engine runs inside the worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TtsEngineKind {
    /// 440 Hz placeholder tone.
    #[default]
    Tone,
    /// Hosted speech via `/audio/speech`.
    OpenAi,
}

/// TTS engine settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TtsSettings {
    pub engine: TtsEngineKind,
    pub model: String,
    pub voice: String,

    /// Playback speed multiplier (0.25–4.0).
    pub speed: f32,
    pub api_base: String,
    pub api_key: Option<String>,

    /// Artificial processing time of the tone engine.
    pub latency_ms: u64,
}

impl Default for TtsSettings {
    fn default() -> Self {
        Self {
            engine: TtsEngineKind::Tone,
            model: "tts-1".to_string(),
            voice: "alloy".to_string(),
            speed: 1.0,
            api_base: DEFAULT_OPENAI_BASE.to_string(),
            api_key: None,
            latency_ms: 100,
        }
    }
}

impl PipelineConfig {
    /// Parse a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(content: &str) -> Result<Self, VoiceError> {
        toml::from_str(content).map_err(|e| VoiceError::Config(format!("invalid config: {e}")))
    }

    /// Read and parse a TOML file.
    pub fn load(path: &Path) -> Result<Self, VoiceError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            VoiceError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        let config = Self::from_toml_str(&content)?;
        tracing::debug!(path = %path.display(), "Loaded pipeline config");
        Ok(config)
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_with(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary variable lookup.
    pub fn apply_env_with(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(ENV_DIALOGUE_URL).filter(|v| !v.trim().is_empty()) {
            self.dialogue.endpoint = url;
        }
        if let Some(key) = lookup(ENV_OPENAI_API_KEY).filter(|v| !v.trim().is_empty()) {
            if self.stt.api_key.is_none() {
                self.stt.api_key = Some(key.clone());
            }
            if self.tts.api_key.is_none() {
                self.tts.api_key = Some(key);
            }
        }
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), VoiceError> {
        if self.capture.chunk_samples == 0 {
            return Err(VoiceError::Config("capture.chunk_samples must be > 0".into()));
        }
        if self.capture.constraints.sample_rate == 0 || self.capture.constraints.channels == 0 {
            return Err(VoiceError::Config(
                "capture.constraints needs a non-zero sample_rate and channels".into(),
            ));
        }
        if self.workers.channel_capacity == 0 {
            return Err(VoiceError::Config("workers.channel_capacity must be > 0".into()));
        }
        if self.dialogue.timeout_ms == 0 {
            return Err(VoiceError::Config("dialogue.timeout_ms must be > 0".into()));
        }
        if !self.dialogue.endpoint.starts_with("http://")
            && !self.dialogue.endpoint.starts_with("https://")
        {
            return Err(VoiceError::Config(format!(
                "dialogue.endpoint is not an http(s) URL: {}",
                self.dialogue.endpoint
            )));
        }
        if self.stt.engine == SttEngineKind::OpenAi && self.stt.api_key.is_none() {
            return Err(VoiceError::Config(format!(
                "stt.engine = \"openai\" needs an API key ({ENV_OPENAI_API_KEY})"
            )));
        }
        if self.tts.engine == TtsEngineKind::OpenAi && self.tts.api_key.is_none() {
            return Err(VoiceError::Config(format!(
                "tts.engine = \"openai\" needs an API key ({ENV_OPENAI_API_KEY})"
            )));
        }
        if !(0.25..=4.0).contains(&self.tts.speed) {
            return Err(VoiceError::Config("tts.speed must be within 0.25–4.0".into()));
        }
        Ok(())
    }
}
