//! Hosted engines speaking the OpenAI audio API.

use async_trait::async_trait;

use super::{SttEngine, TtsEngine};
use crate::audio;
use crate::config::{SttSettings, TtsSettings};
use crate::error::VoiceError;

/// Response from the transcription endpoint.
#[derive(serde::Deserialize)]
struct TranscriptionResponse {
    text: String,
}

fn endpoint(base: &str, path: &str) -> String {
    format!("{}/{path}", base.trim_end_matches('/'))
}

// ── Whisper STT ────────────────────────────────────────────────────

/// Transcribes through `POST {api_base}/audio/transcriptions`.
pub struct OpenAiSttEngine {
    client: reqwest::Client,
    api_base: String,
    api_key: Option<String>,
    model: String,
}

impl OpenAiSttEngine {
    #[must_use]
    pub fn from_settings(settings: &SttSettings) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: settings.api_base.clone(),
            api_key: settings.api_key.clone(),
            model: settings.model.clone(),
        }
    }

    fn key(&self) -> Result<&str, VoiceError> {
        self.api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| VoiceError::Config("OpenAI API key required for Whisper".to_string()))
    }
}

#[async_trait]
impl SttEngine for OpenAiSttEngine {
    fn name(&self) -> &str {
        "Whisper"
    }

    async fn load(&mut self) -> Result<(), VoiceError> {
        self.key()?;
        tracing::info!(model = %self.model, "Whisper engine configured");
        Ok(())
    }

    async fn transcribe(&mut self, samples: &[f32]) -> Result<String, VoiceError> {
        let api_key = self.key()?;
        let wav = audio::encode_wav(samples, audio::STT_SAMPLE_RATE, 1)
            .map_err(|e| VoiceError::Transcription(format!("failed to encode audio: {e}")))?;
        tracing::debug!(audio_bytes = wav.len(), "starting Whisper transcription");

        let form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(wav)
                    .file_name("audio.wav")
                    .mime_str("audio/wav")
                    .map_err(|e| VoiceError::Transcription(e.to_string()))?,
            )
            .text("model", self.model.clone());

        let response = self
            .client
            .post(endpoint(&self.api_base, "audio/transcriptions"))
            .bearer_auth(api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Whisper request failed");
                VoiceError::Transcription(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|e| format!("<failed to read response body: {e}>"));
            tracing::error!(status = %status, body = %body, "Whisper API error");
            return Err(VoiceError::Transcription(format!(
                "Whisper API error {status}: {body}"
            )));
        }

        let result: TranscriptionResponse = response
            .json()
            .await
            .map_err(|e| VoiceError::Transcription(format!("invalid Whisper response: {e}")))?;

        tracing::debug!(transcript = %result.text, "transcription complete");
        Ok(result.text)
    }
}

// ── Speech TTS ─────────────────────────────────────────────────────

/// Synthesizes through `POST {api_base}/audio/speech` with WAV output.
pub struct OpenAiTtsEngine {
    client: reqwest::Client,
    api_base: String,
    api_key: Option<String>,
    model: String,
    voice: String,
    speed: f32,
}

impl OpenAiTtsEngine {
    #[must_use]
    pub fn from_settings(settings: &TtsSettings) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: settings.api_base.clone(),
            api_key: settings.api_key.clone(),
            model: settings.model.clone(),
            voice: settings.voice.clone(),
            speed: settings.speed,
        }
    }

    fn key(&self) -> Result<&str, VoiceError> {
        self.api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| VoiceError::Config("OpenAI API key required for TTS".to_string()))
    }
}

#[async_trait]
impl TtsEngine for OpenAiTtsEngine {
    fn name(&self) -> &str {
        "OpenAI TTS"
    }

    async fn load(&mut self) -> Result<(), VoiceError> {
        self.key()?;
        tracing::info!(model = %self.model, voice = %self.voice, "OpenAI TTS engine configured");
        Ok(())
    }

    async fn synthesize(&mut self, text: &str) -> Result<Vec<u8>, VoiceError> {
        #[derive(serde::Serialize)]
        struct SpeechRequest<'a> {
            model: &'a str,
            input: &'a str,
            voice: &'a str,
            speed: f32,
            response_format: &'a str,
        }

        let api_key = self.key()?;
        let request = SpeechRequest {
            model: &self.model,
            input: text,
            voice: &self.voice,
            speed: self.speed,
            response_format: "wav",
        };

        let response = self
            .client
            .post(endpoint(&self.api_base, "audio/speech"))
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| VoiceError::Synthesis(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|e| format!("<failed to read response body: {e}>"));
            return Err(VoiceError::Synthesis(format!(
                "OpenAI TTS error {status}: {body}"
            )));
        }

        let audio = response
            .bytes()
            .await
            .map_err(|e| VoiceError::Synthesis(e.to_string()))?;
        Ok(audio.to_vec())
    }
}
