//! Text-to-speech client: the orchestrator's handle on the TTS worker.

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::backend::{TtsEngine, TtsEngineFactory};
use crate::error::VoiceError;
use crate::protocol::{TtsReply, TtsRequest, millis_to_duration};
use crate::worker::{Delivery, Readiness, RequestId, WorkerClient, WorkerEnvelope, WorkerHandler, WorkerId};

/// Encoded speech plus the engine's self-reported synthesis time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesizedAudio {
    pub bytes: Vec<u8>,
    pub duration: Duration,
}

// ── Worker side ────────────────────────────────────────────────────

/// Handler running inside the TTS worker unit.
pub struct TtsWorker {
    engine: Box<dyn TtsEngine>,
    ready: bool,
}

impl TtsWorker {
    pub fn new(engine: Box<dyn TtsEngine>) -> Self {
        Self {
            engine,
            ready: false,
        }
    }
}

#[async_trait]
impl WorkerHandler for TtsWorker {
    type Request = TtsRequest;
    type Reply = TtsReply;

    async fn handle(&mut self, request: TtsRequest) -> Option<TtsReply> {
        match request {
            TtsRequest::Init => {
                if self.ready {
                    return None;
                }
                match self.engine.load().await {
                    Ok(()) => {
                        self.ready = true;
                        tracing::info!(engine = self.engine.name(), "TTS engine ready");
                        Some(TtsReply::Ready)
                    }
                    Err(e) => {
                        tracing::warn!(engine = self.engine.name(), error = %e, "TTS engine failed to load");
                        Some(TtsReply::Error {
                            error: e.detail(),
                        })
                    }
                }
            }
            TtsRequest::Synthesize { text } => {
                if !self.ready {
                    return Some(TtsReply::Error {
                        error: format!("{} not initialized", self.engine.name()),
                    });
                }

                let started = Instant::now();
                match self.engine.synthesize(&text).await {
                    Ok(audio_buffer) => Some(TtsReply::Result {
                        audio_buffer,
                        duration: started.elapsed().as_secs_f64() * 1000.0,
                    }),
                    Err(e) => Some(TtsReply::Error {
                        error: e.to_string(),
                    }),
                }
            }
        }
    }
}

// ── Client side ────────────────────────────────────────────────────

/// Request/response wrapper around the TTS worker.
pub struct TextToSpeechClient {
    worker: WorkerClient<TtsWorker>,
}

impl TextToSpeechClient {
    pub fn new(factory: TtsEngineFactory, capacity: usize) -> Self {
        Self {
            worker: WorkerClient::new("TTS", capacity, move || TtsWorker::new(factory())),
        }
    }

    /// Idempotent: a no-op while initializing or ready.
    pub fn initialize(&mut self) -> Result<(), VoiceError> {
        self.worker.initialize()
    }

    pub const fn readiness(&self) -> Readiness {
        self.worker.readiness()
    }

    pub fn worker_id(&self) -> Option<WorkerId> {
        self.worker.worker_id()
    }

    pub const fn is_busy(&self) -> bool {
        self.worker.is_busy()
    }

    /// Whether the engine has been initialized and is idle.
    pub const fn can_accept(&self) -> bool {
        self.worker.can_accept()
    }

    /// Submit text for synthesis.
    pub fn submit(&mut self, text: impl Into<String>) -> Result<RequestId, VoiceError> {
        self.worker.submit(TtsRequest::Synthesize { text: text.into() })
    }

    /// Correlate a worker reply.
    pub fn accept(
        &mut self,
        envelope: WorkerEnvelope<TtsReply>,
    ) -> Delivery<Result<SynthesizedAudio, VoiceError>> {
        self.worker.accept(envelope).map(into_audio)
    }

    /// Next reply envelope from any generation. Cancel-safe.
    pub async fn next_reply(&mut self) -> Option<WorkerEnvelope<TtsReply>> {
        self.worker.next_reply().await
    }

    /// Abort the worker; it is recreated by the next [`initialize`](Self::initialize).
    pub fn terminate(&mut self) {
        self.worker.terminate();
    }

    /// Initialize if needed, synthesize `text` and wait for the audio.
    pub async fn synthesize(&mut self, text: impl Into<String>) -> Result<SynthesizedAudio, VoiceError> {
        let reply = self
            .worker
            .request(TtsRequest::Synthesize { text: text.into() })
            .await?;
        into_audio(reply)
    }
}

fn into_audio(reply: TtsReply) -> Result<SynthesizedAudio, VoiceError> {
    match reply {
        TtsReply::Result {
            audio_buffer,
            duration,
        } => Ok(SynthesizedAudio {
            bytes: audio_buffer,
            duration: millis_to_duration(duration),
        }),
        TtsReply::Error { error } => Err(VoiceError::Synthesis(error)),
        TtsReply::Ready => Err(VoiceError::Synthesis(
            "worker answered a synthesis with ready".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::backend::ToneTtsEngine;

    fn tone(latency: Duration) -> TtsEngineFactory {
        Arc::new(move || -> Box<dyn TtsEngine> {
            Box::new(ToneTtsEngine::new().with_latency(latency))
        })
    }

    #[tokio::test(start_paused = true)]
    async fn synthesize_reports_engine_time() {
        let mut client = TextToSpeechClient::new(tone(Duration::from_millis(100)), 4);
        let audio = client.synthesize("Hi there!").await.unwrap();
        assert_eq!(audio.duration, Duration::from_millis(100));
        assert_eq!(&audio.bytes[..4], b"RIFF");
    }

    #[tokio::test]
    async fn cannot_accept_before_initialize() {
        let mut client = TextToSpeechClient::new(tone(Duration::ZERO), 4);
        assert!(!client.can_accept());
        client.initialize().unwrap();
        assert!(client.can_accept());
        client.submit("hello").unwrap();
        assert!(!client.can_accept());
    }

    #[tokio::test]
    async fn worker_rejects_synthesis_before_init() {
        let mut worker = TtsWorker::new(Box::new(ToneTtsEngine::new()));
        let reply = worker
            .handle(TtsRequest::Synthesize {
                text: "hi".to_string(),
            })
            .await;
        assert_eq!(
            reply,
            Some(TtsReply::Error {
                error: "Tone TTS not initialized".to_string()
            })
        );
    }

    #[test]
    fn engine_error_maps_to_synthesis_error() {
        let err = into_audio(TtsReply::Error {
            error: "voice missing".to_string(),
        })
        .unwrap_err();
        assert_eq!(err.to_string(), "Speech synthesis failed: voice missing");
    }
}
