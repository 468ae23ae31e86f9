//! Voice turn pipeline: capture → speech-to-text → dialogue → text-to-speech → playback.
//!
//! The [`PipelineOrchestrator`] owns one turn at a time and drives it through
//! [`PipelineState`]. STT and TTS engines run inside isolated worker units
//! ([`worker`]) and talk to the orchestrator only through tagged messages
//! ([`protocol`]). Real devices live behind the `local-audio` feature.

pub mod audio;
#[cfg(feature = "local-audio")]
pub mod audio_thread;
pub mod backend;
pub mod capture;
pub mod config;
pub mod dialogue;
pub mod error;
pub mod history;
pub mod latency;
pub mod pipeline;
pub mod playback;
pub mod protocol;
pub mod stt;
pub mod tts;
pub mod worker;

// Re-export key types for convenience
pub use capture::{AudioCapture, InputDevice, RecordedAudio, WavFileInput};
pub use config::PipelineConfig;
pub use dialogue::{DialogueBackend, DialogueClient, HttpDialogueBackend};
pub use error::{DialogueError, VoiceError};
pub use history::{ConversationHistory, ConversationMessage, Role};
pub use latency::LatencyMetrics;
pub use pipeline::{PipelineComponents, PipelineOrchestrator, PipelineState, TurnId, VoiceEvent};
pub use playback::{ClockOutput, OutputBackend, PlaybackEngine, WavDumpOutput};
pub use stt::SpeechToTextClient;
pub use tts::TextToSpeechClient;

#[cfg(feature = "local-audio")]
pub use audio_thread::{CpalInput, RodioOutput};
