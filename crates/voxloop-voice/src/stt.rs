//! Speech-to-text client: the orchestrator's handle on the STT worker.
//!
//! Audio reaches the client as [`AudioChunk`]s through [`chunk_sink`]; they
//! are buffered in capture order and concatenated into one utterance when
//! listening stops. The utterance is sent to the worker as little-endian f32
//! bytes and the worker answers with exactly one `result` or `error`.
//!
//! [`chunk_sink`]: SpeechToTextClient::chunk_sink

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::audio;
use crate::backend::{SttEngine, SttEngineFactory};
use crate::capture::{AudioChunk, ChunkSink};
use crate::error::VoiceError;
use crate::protocol::{SttReply, SttRequest, millis_to_duration};
use crate::worker::{Delivery, Readiness, RequestId, WorkerClient, WorkerEnvelope, WorkerHandler, WorkerId};

/// A finalized transcription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transcript {
    pub text: String,
    /// Processing time self-reported by the engine.
    pub duration: Option<Duration>,
}

// ── Worker side ────────────────────────────────────────────────────

/// Handler running inside the STT worker unit.
pub struct SttWorker {
    engine: Box<dyn SttEngine>,
    ready: bool,
}

impl SttWorker {
    pub fn new(engine: Box<dyn SttEngine>) -> Self {
        Self {
            engine,
            ready: false,
        }
    }
}

#[async_trait]
impl WorkerHandler for SttWorker {
    type Request = SttRequest;
    type Reply = SttReply;

    async fn handle(&mut self, request: SttRequest) -> Option<SttReply> {
        match request {
            SttRequest::Init => {
                if self.ready {
                    return None;
                }
                match self.engine.load().await {
                    Ok(()) => {
                        self.ready = true;
                        tracing::info!(engine = self.engine.name(), "STT engine ready");
                        Some(SttReply::Ready)
                    }
                    Err(e) => {
                        tracing::warn!(engine = self.engine.name(), error = %e, "STT engine failed to load");
                        Some(SttReply::Error {
                            error: e.detail(),
                        })
                    }
                }
            }
            SttRequest::Transcribe { audio_buffer } => {
                if !self.ready {
                    return Some(SttReply::Error {
                        error: format!("{} not initialized", self.engine.name()),
                    });
                }

                let started = Instant::now();
                let samples = match audio::bytes_to_samples(&audio_buffer) {
                    Ok(samples) => samples,
                    Err(e) => {
                        return Some(SttReply::Error {
                            error: e.to_string(),
                        });
                    }
                };

                match self.engine.transcribe(&samples).await {
                    Ok(text) => Some(SttReply::Result {
                        text,
                        duration: Some(started.elapsed().as_secs_f64() * 1000.0),
                    }),
                    Err(e) => Some(SttReply::Error {
                        error: e.to_string(),
                    }),
                }
            }
        }
    }
}

// ── Client side ────────────────────────────────────────────────────

/// Request/response wrapper around the STT worker.
pub struct SpeechToTextClient {
    worker: WorkerClient<SttWorker>,
    chunks_tx: ChunkSink,
    chunks_rx: mpsc::UnboundedReceiver<AudioChunk>,
}

impl SpeechToTextClient {
    pub fn new(factory: SttEngineFactory, capacity: usize) -> Self {
        let (chunks_tx, chunks_rx) = mpsc::unbounded_channel();
        Self {
            worker: WorkerClient::new("STT", capacity, move || SttWorker::new(factory())),
            chunks_tx,
            chunks_rx,
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

    /// Where capture should deliver chunks.
    pub fn chunk_sink(&self) -> ChunkSink {
        self.chunks_tx.clone()
    }

    /// Concatenate every buffered chunk, in capture order, into STT bytes.
    pub fn take_utterance(&mut self) -> Vec<u8> {
        let mut samples = Vec::new();
        let mut expected = None;
        let mut chunks = 0usize;
        while let Ok(chunk) = self.chunks_rx.try_recv() {
            if let Some(seq) = expected {
                if chunk.seq != seq {
                    tracing::warn!(expected = seq, got = chunk.seq, "Audio chunk out of sequence");
                }
            }
            expected = Some(chunk.seq + 1);
            chunks += 1;
            samples.extend_from_slice(&chunk.samples);
        }
        tracing::debug!(chunks, samples = samples.len(), "Collected utterance");
        audio::samples_to_bytes(&samples)
    }

    /// Drop any buffered chunks.
    pub fn discard_buffered(&mut self) {
        while self.chunks_rx.try_recv().is_ok() {}
    }

    /// Submit an utterance for transcription.
    pub fn submit(&mut self, audio_buffer: Vec<u8>) -> Result<RequestId, VoiceError> {
        self.worker.submit(SttRequest::Transcribe { audio_buffer })
    }

    /// Correlate a worker reply.
    pub fn accept(
        &mut self,
        envelope: WorkerEnvelope<SttReply>,
    ) -> Delivery<Result<Transcript, VoiceError>> {
        self.worker.accept(envelope).map(|reply| match reply {
            SttReply::Result { text, duration } => Ok(Transcript {
                text,
                duration: duration.map(millis_to_duration),
            }),
            SttReply::Error { error } => Err(VoiceError::Transcription(error)),
            SttReply::Ready => Err(VoiceError::Transcription(
                "worker answered a transcription with ready".to_string(),
            )),
        })
    }

    /// Next reply envelope from any generation. Cancel-safe.
    pub async fn next_reply(&mut self) -> Option<WorkerEnvelope<SttReply>> {
        self.worker.next_reply().await
    }

    /// Abort the worker; it is recreated by the next [`initialize`](Self::initialize).
    pub fn terminate(&mut self) {
        self.worker.terminate();
    }

    /// Initialize if needed, transcribe one buffer and wait for the result.
    pub async fn transcribe(&mut self, audio_buffer: Vec<u8>) -> Result<Transcript, VoiceError> {
        match self
            .worker
            .request(SttRequest::Transcribe { audio_buffer })
            .await?
        {
            SttReply::Result { text, duration } => Ok(Transcript {
                text,
                duration: duration.map(millis_to_duration),
            }),
            SttReply::Error { error } => Err(VoiceError::Transcription(error)),
            SttReply::Ready => Err(VoiceError::Transcription(
                "worker answered a transcription with ready".to_string(),
            )),
        }
    }
}
