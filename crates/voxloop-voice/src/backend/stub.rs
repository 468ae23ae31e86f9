//! Deterministic engines for headless runs and tests.

use std::collections::VecDeque;
use std::f32::consts::TAU;
use std::time::Duration;

use async_trait::async_trait;

use super::{SttEngine, TtsEngine};
use crate::audio;
use crate::error::VoiceError;

// ── Scripted STT ───────────────────────────────────────────────────

/// Returns queued transcripts in order; the last one repeats forever.
pub struct ScriptedSttEngine {
    lines: VecDeque<String>,
    last: String,
    latency: Duration,
    loaded: bool,
}

impl ScriptedSttEngine {
    pub fn new<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            lines: lines.into_iter().map(Into::into).collect(),
            last: String::new(),
            latency: Duration::ZERO,
            loaded: false,
        }
    }

    /// Simulated processing time per transcription.
    #[must_use]
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }
}

#[async_trait]
impl SttEngine for ScriptedSttEngine {
    fn name(&self) -> &str {
        "Scripted STT"
    }

    async fn load(&mut self) -> Result<(), VoiceError> {
        self.loaded = true;
        Ok(())
    }

    async fn transcribe(&mut self, audio: &[f32]) -> Result<String, VoiceError> {
        if !self.loaded {
            return Err(VoiceError::Transcription("engine not loaded".to_string()));
        }
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if let Some(next) = self.lines.pop_front() {
            self.last = next;
        }
        tracing::debug!(samples = audio.len(), text = %self.last, "Scripted transcription");
        Ok(self.last.clone())
    }
}

// ── Tone TTS ───────────────────────────────────────────────────────

const TONE_SAMPLE_RATE: u32 = 44_100;
const TONE_FREQUENCY: f32 = 440.0;
const TONE_AMPLITUDE: f32 = 0.3;

/// Placeholder synthesizer: a 440 Hz sine, WAV-encoded.
///
/// The clip lasts `max(min_duration, per_char × chars)`; with the defaults
/// that is a flat one second.
pub struct ToneTtsEngine {
    min_duration: Duration,
    per_char: Duration,
    latency: Duration,
}

impl Default for ToneTtsEngine {
    fn default() -> Self {
        Self {
            min_duration: Duration::from_secs(1),
            per_char: Duration::ZERO,
            latency: Duration::from_millis(100),
        }
    }
}

impl ToneTtsEngine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulated processing time per synthesis.
    #[must_use]
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Lower bound on the clip length.
    #[must_use]
    pub const fn with_min_duration(mut self, duration: Duration) -> Self {
        self.min_duration = duration;
        self
    }

    /// Clip length contributed by each character of input.
    #[must_use]
    pub const fn with_per_char(mut self, per_char: Duration) -> Self {
        self.per_char = per_char;
        self
    }

    fn clip_duration(&self, text: &str) -> Duration {
        let chars = u32::try_from(text.chars().count()).unwrap_or(u32::MAX);
        self.min_duration.max(self.per_char.saturating_mul(chars))
    }
}

#[async_trait]
impl TtsEngine for ToneTtsEngine {
    fn name(&self) -> &str {
        "Tone TTS"
    }

    async fn load(&mut self) -> Result<(), VoiceError> {
        Ok(())
    }

    async fn synthesize(&mut self, text: &str) -> Result<Vec<u8>, VoiceError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let duration = self.clip_duration(text);
        #[allow(
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss,
            clippy::cast_precision_loss
        )]
        let samples: Vec<f32> = {
            let count = (duration.as_secs_f64() * f64::from(TONE_SAMPLE_RATE)) as usize;
            (0..count)
                .map(|i| {
                    let t = i as f32 / TONE_SAMPLE_RATE as f32;
                    (TAU * TONE_FREQUENCY * t).sin() * TONE_AMPLITUDE
                })
                .collect()
        };

        audio::encode_wav(&samples, TONE_SAMPLE_RATE, 1)
            .map_err(|e| VoiceError::Synthesis(format!("failed to encode tone: {e}")))
    }
}
