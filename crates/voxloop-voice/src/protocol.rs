//! Worker message protocol: the JSON shapes exchanged with STT/TTS units.
//!
//! ```text
//!   {type:"init"}                      → {type:"ready"}
//!   {type:"transcribe", audioBuffer}   → {type:"result", text, duration} | {type:"error", error}
//!   {type:"synthesize", text}          → {type:"result", audioBuffer, duration} | {type:"error", error}
//! ```
//!
//! Durations are self-reported by the engine, in milliseconds. Request and
//! worker-generation identifiers travel outside these payloads, in
//! [`WorkerEnvelope`](crate::worker::WorkerEnvelope).

use serde::{Deserialize, Serialize};

// ── Shared traits ──────────────────────────────────────────────────

/// A request a worker understands.
pub trait WorkerRequest: Send + 'static {
    /// The `init` request.
    fn init() -> Self;
}

/// Classification of a worker reply, used for correlation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind<'a> {
    Ready,
    Result,
    Error(&'a str),
}

/// A reply a worker produces.
pub trait WorkerReply: Send + std::fmt::Debug + 'static {
    fn kind(&self) -> ReplyKind<'_>;
}

// ── Speech-to-text ─────────────────────────────────────────────────

/// Request sent to an STT worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SttRequest {
    Init,
    Transcribe {
        /// Little-endian f32 PCM, 16 kHz mono.
        #[serde(rename = "audioBuffer")]
        audio_buffer: Vec<u8>,
    },
}

/// Reply from an STT worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SttReply {
    Ready,
    Result {
        text: String,
        /// Milliseconds spent transcribing, if the engine reports it.
        #[serde(default)]
        duration: Option<f64>,
    },
    Error {
        error: String,
    },
}

impl WorkerRequest for SttRequest {
    fn init() -> Self {
        Self::Init
    }
}

impl WorkerReply for SttReply {
    fn kind(&self) -> ReplyKind<'_> {
        match self {
            Self::Ready => ReplyKind::Ready,
            Self::Result { .. } => ReplyKind::Result,
            Self::Error { error } => ReplyKind::Error(error),
        }
    }
}

// ── Text-to-speech ─────────────────────────────────────────────────

/// Request sent to a TTS worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TtsRequest {
    Init,
    Synthesize { text: String },
}

/// Reply from a TTS worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TtsReply {
    Ready,
    Result {
        /// Encoded audio (WAV).
        #[serde(rename = "audioBuffer")]
        audio_buffer: Vec<u8>,
        /// Milliseconds spent synthesizing.
        duration: f64,
    },
    Error {
        error: String,
    },
}

impl WorkerRequest for TtsRequest {
    fn init() -> Self {
        Self::Init
    }
}

impl WorkerReply for TtsReply {
    fn kind(&self) -> ReplyKind<'_> {
        match self {
            Self::Ready => ReplyKind::Ready,
            Self::Result { .. } => ReplyKind::Result,
            Self::Error { error } => ReplyKind::Error(error),
        }
    }
}

/// Convert a self-reported millisecond duration, treating garbage as zero.
pub(crate) fn millis_to_duration(ms: f64) -> std::time::Duration {
    std::time::Duration::try_from_secs_f64(ms / 1000.0).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn stt_messages_use_wire_shapes() {
        assert_eq!(
            serde_json::to_value(SttRequest::Init).unwrap(),
            json!({ "type": "init" })
        );
        assert_eq!(
            serde_json::to_value(SttRequest::Transcribe {
                audio_buffer: vec![1, 2]
            })
            .unwrap(),
            json!({ "type": "transcribe", "audioBuffer": [1, 2] })
        );

        let reply: SttReply =
            serde_json::from_value(json!({ "type": "result", "text": "hello", "duration": 120 }))
                .unwrap();
        assert_eq!(
            reply,
            SttReply::Result {
                text: "hello".to_string(),
                duration: Some(120.0)
            }
        );
    }

    #[test]
    fn stt_result_without_duration_parses() {
        let reply: SttReply =
            serde_json::from_value(json!({ "type": "result", "text": "" })).unwrap();
        assert_eq!(
            reply,
            SttReply::Result {
                text: String::new(),
                duration: None
            }
        );
    }

    #[test]
    fn tts_messages_use_wire_shapes() {
        assert_eq!(
            serde_json::to_value(TtsRequest::Synthesize {
                text: "Hi there!".to_string()
            })
            .unwrap(),
            json!({ "type": "synthesize", "text": "Hi there!" })
        );
        assert_eq!(
            serde_json::to_value(TtsReply::Error {
                error: "boom".to_string()
            })
            .unwrap(),
            json!({ "type": "error", "error": "boom" })
        );
        assert_eq!(serde_json::to_value(TtsReply::Ready).unwrap(), json!({ "type": "ready" }));
    }

    #[test]
    fn reply_kind_exposes_error_text() {
        let reply = SttReply::Error {
            error: "Whisper not initialized".to_string(),
        };
        assert_eq!(reply.kind(), ReplyKind::Error("Whisper not initialized"));
        assert_eq!(TtsReply::Ready.kind(), ReplyKind::Ready);
    }

    #[test]
    fn bad_durations_become_zero() {
        assert_eq!(millis_to_duration(f64::NAN), std::time::Duration::ZERO);
        assert_eq!(millis_to_duration(-5.0), std::time::Duration::ZERO);
        assert_eq!(millis_to_duration(250.0), std::time::Duration::from_millis(250));
    }
}
