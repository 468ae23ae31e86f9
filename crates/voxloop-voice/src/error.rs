//! Voice pipeline error types.

use std::time::Duration;

use crate::pipeline::PipelineState;

/// Errors that can occur in the voice pipeline.
#[derive(Debug, Clone, thiserror::Error)]
pub enum VoiceError {
    /// Microphone permission denied or no input device present.
    #[error("Audio input device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Capture is already running on this device.
    #[error("Audio capture is already running")]
    CaptureActive,

    /// A worker engine failed to load, or was used before `init`.
    #[error("Worker initialisation failed: {0}")]
    WorkerInit(String),

    /// The worker's request queue is closed or full.
    #[error("Worker unavailable: {0}")]
    WorkerUnavailable(String),

    /// Failed to transcribe audio.
    #[error("Transcription failed: {0}")]
    Transcription(String),

    /// The dialogue exchange failed.
    #[error(transparent)]
    Dialogue(#[from] DialogueError),

    /// Failed to synthesize speech.
    #[error("Speech synthesis failed: {0}")]
    Synthesis(String),

    /// Synthesized audio could not be decoded or played.
    #[error("Playback failed: {0}")]
    Playback(String),

    /// A pipeline command was issued in a state that does not accept it.
    #[error("Cannot {action} while {from:?}")]
    InvalidTransition {
        from: PipelineState,
        action: &'static str,
    },

    /// Invalid or incomplete configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error (recording dumps, config files).
    #[error("IO error: {0}")]
    Io(String),
}

impl From<std::io::Error> for VoiceError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Failure modes of a dialogue exchange.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DialogueError {
    /// No response within the bounded wait.
    #[error("Dialogue request timed out after {}ms", .after.as_millis())]
    Timeout { after: Duration },

    /// The endpoint answered with a non-success status, or could not be reached.
    #[error("Dialogue endpoint failed{}: {message}", .status.map(|s| format!(" ({s})")).unwrap_or_default())]
    Upstream {
        status: Option<u16>,
        message: String,
    },

    /// The message was empty; nothing was sent.
    #[error("Dialogue message is empty")]
    EmptyMessage,
}

impl VoiceError {
    /// Whether this is a dialogue timeout.
    #[must_use]
    pub const fn is_dialogue_timeout(&self) -> bool {
        matches!(self, Self::Dialogue(DialogueError::Timeout { .. }))
    }

    /// The message without the variant prefix, for errors that get re-wrapped
    /// on the other side of a worker channel.
    #[must_use]
    pub fn detail(&self) -> String {
        match self {
            Self::DeviceUnavailable(msg)
            | Self::WorkerInit(msg)
            | Self::WorkerUnavailable(msg)
            | Self::Transcription(msg)
            | Self::Synthesis(msg)
            | Self::Playback(msg)
            | Self::Config(msg)
            | Self::Io(msg) => msg.clone(),
            other => other.to_string(),
        }
    }
}
