//! Speech engine traits: the capability interfaces run inside STT/TTS workers.
//!
//! A worker owns exactly one engine for its whole lifetime. Engines are
//! built by a factory so that a terminated worker can be replaced by a fresh
//! one with a fresh engine.
//!
//! ## Engine implementations
//!
//! | Module       | STT                      | TTS                |
//! |--------------|--------------------------|--------------------|
//! | [`stub`]     | [`ScriptedSttEngine`]    | [`ToneTtsEngine`]  |
//! | [`openai`]   | [`OpenAiSttEngine`]      | [`OpenAiTtsEngine`]|

pub mod openai;
pub mod stub;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

pub use openai::{OpenAiSttEngine, OpenAiTtsEngine};
pub use stub::{ScriptedSttEngine, ToneTtsEngine};

use crate::config::{SttEngineKind, SttSettings, TtsEngineKind, TtsSettings};
use crate::error::VoiceError;

// ── STT ────────────────────────────────────────────────────────────

/// Speech-to-text engine.
#[async_trait]
pub trait SttEngine: Send {
    /// Engine name, used in logs and "not initialized" errors.
    fn name(&self) -> &str;

    /// Prepare the engine. Called once per worker, on `init`.
    async fn load(&mut self) -> Result<(), VoiceError>;

    /// Transcribe 16 kHz mono samples. An empty string means no speech.
    async fn transcribe(&mut self, audio: &[f32]) -> Result<String, VoiceError>;
}

// ── TTS ────────────────────────────────────────────────────────────

/// Text-to-speech engine.
#[async_trait]
pub trait TtsEngine: Send {
    /// Engine name, used in logs and "not initialized" errors.
    fn name(&self) -> &str;

    /// Prepare the engine. Called once per worker, on `init`.
    async fn load(&mut self) -> Result<(), VoiceError>;

    /// Synthesize `text` into an encoded (WAV) buffer.
    async fn synthesize(&mut self, text: &str) -> Result<Vec<u8>, VoiceError>;
}

// ── Factories ──────────────────────────────────────────────────────

/// Builds a fresh STT engine for each worker generation.
pub type SttEngineFactory = Arc<dyn Fn() -> Box<dyn SttEngine> + Send + Sync>;

/// Builds a fresh TTS engine for each worker generation.
pub type TtsEngineFactory = Arc<dyn Fn() -> Box<dyn TtsEngine> + Send + Sync>;

/// Engine factory for the configured STT engine.
#[must_use]
pub fn stt_factory(settings: &SttSettings) -> SttEngineFactory {
    let settings = settings.clone();
    match settings.engine {
        SttEngineKind::Scripted => Arc::new(move || -> Box<dyn SttEngine> {
            Box::new(
                ScriptedSttEngine::new(settings.script.clone())
                    .with_latency(Duration::from_millis(settings.latency_ms)),
            )
        }),
        SttEngineKind::OpenAi => Arc::new(move || -> Box<dyn SttEngine> {
            Box::new(OpenAiSttEngine::from_settings(&settings))
        }),
    }
}

/// Engine factory for the configured TTS engine.
#[must_use]
pub fn tts_factory(settings: &TtsSettings) -> TtsEngineFactory {
    let settings = settings.clone();
    match settings.engine {
        TtsEngineKind::Tone => Arc::new(move || -> Box<dyn TtsEngine> {
            Box::new(ToneTtsEngine::new().with_latency(Duration::from_millis(settings.latency_ms)))
        }),
        TtsEngineKind::OpenAi => Arc::new(move || -> Box<dyn TtsEngine> {
            Box::new(OpenAiTtsEngine::from_settings(&settings))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factories_follow_configured_engine() {
        let stt = stt_factory(&SttSettings::default());
        assert_eq!(stt().name(), "Scripted STT");

        let tts = tts_factory(&TtsSettings {
            engine: TtsEngineKind::OpenAi,
            api_key: Some("sk-test".into()),
            ..TtsSettings::default()
        });
        assert_eq!(tts().name(), "OpenAI TTS");
    }
}
