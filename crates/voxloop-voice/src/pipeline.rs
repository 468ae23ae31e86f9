//! Pipeline orchestrator: the turn state machine.
//!
//! ```text
//!   Idle → Listening → Transcribing → Dialoguing → Synthesizing → Speaking → Idle
//!            │              │              │              │
//!            └──────────────┴──────┬───────┴──────────────┘
//!                                  ▼
//!                                Error   (recover: start_listening / reset)
//! ```
//!
//! The orchestrator is a single cooperative coordinator. Commands
//! (`start_listening`, `stop_listening`, `reset`) come from the caller;
//! everything else arrives as a [`PipelineEvent`] through
//! [`next_event`](PipelineOrchestrator::next_event) and is applied by
//! [`handle_event`](PipelineOrchestrator::handle_event), one at a time.
//! No call ever blocks on a worker.
//!
//! Staleness is decided in two places: worker replies are correlated by
//! generation and request id inside the clients, and dialogue/playback
//! completions carry the [`TurnId`] that started them.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::backend::{self, SttEngineFactory, TtsEngineFactory};
use crate::capture::{AudioCapture, InputDevice, RecordedAudio};
use crate::config::PipelineConfig;
use crate::dialogue::{DialogueBackend, DialogueClient, DialogueExchange, HttpDialogueBackend};
use crate::error::{DialogueError, VoiceError};
use crate::history::ConversationHistory;
use crate::latency::{LatencyMetrics, LatencyTracker, Stage};
use crate::playback::{OutputBackend, PlaybackEngine};
use crate::protocol::{SttReply, TtsReply};
use crate::stt::SpeechToTextClient;
use crate::tts::TextToSpeechClient;
use crate::worker::{Delivery, WorkerEnvelope, WorkerId};

// ── State ──────────────────────────────────────────────────────────

/// Current stage of the turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PipelineState {
    /// No turn in progress.
    Idle,

    /// Microphone open, chunks flowing to the STT client.
    Listening,

    /// Utterance submitted to the STT worker.
    Transcribing,

    /// Transcript sent to the dialogue endpoint.
    Dialoguing,

    /// Response submitted to the TTS worker.
    Synthesizing,

    /// Synthesized audio playing.
    Speaking,

    /// The turn failed; see [`PipelineOrchestrator::error`].
    Error,
}

/// Identifier of one turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TurnId(pub u64);

impl fmt::Display for TurnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

// ── Events ─────────────────────────────────────────────────────────

/// Inbound events driving the state machine.
#[derive(Debug)]
pub enum PipelineEvent {
    /// A reply from the STT worker (any generation).
    Stt(WorkerEnvelope<SttReply>),

    /// A reply from the TTS worker (any generation).
    Tts(WorkerEnvelope<TtsReply>),

    /// A dialogue exchange finished.
    Dialogue {
        turn: TurnId,
        result: Result<DialogueExchange, DialogueError>,
    },

    /// A clip finished playing.
    PlaybackFinished { turn: TurnId },
}

/// Outbound notifications for the application layer.
#[derive(Debug, Clone)]
pub enum VoiceEvent {
    /// Pipeline state changed.
    StateChanged(PipelineState),

    /// Final transcript of the user's utterance.
    Transcript(String),

    /// Response text from the dialogue endpoint.
    Response(String),

    /// Playback started.
    SpeakingStarted,

    /// Playback finished naturally.
    SpeakingFinished,

    /// Latencies of a completed turn.
    Latency(LatencyMetrics),

    /// A stage failed.
    Error(String),

    /// The finalized recording of the utterance, for preview.
    RecordingReady(RecordedAudio),
}

// ── Components ─────────────────────────────────────────────────────

/// Everything the orchestrator needs from the outside world.
pub struct PipelineComponents {
    pub input: Box<dyn InputDevice>,
    pub stt: SttEngineFactory,
    pub tts: TtsEngineFactory,
    pub dialogue: Arc<dyn DialogueBackend>,
    pub output: Box<dyn OutputBackend>,
}

impl PipelineComponents {
    /// Engines and dialogue transport as configured; devices supplied by the caller.
    pub fn from_config(
        config: &PipelineConfig,
        input: Box<dyn InputDevice>,
        output: Box<dyn OutputBackend>,
    ) -> Self {
        Self {
            input,
            stt: backend::stt_factory(&config.stt),
            tts: backend::tts_factory(&config.tts),
            dialogue: Arc::new(HttpDialogueBackend::new(config.dialogue.endpoint.clone())),
            output,
        }
    }
}

// ── Turn ───────────────────────────────────────────────────────────

#[derive(Debug)]
struct Turn {
    id: TurnId,
    transcript: String,
    response: String,
    error: Option<VoiceError>,
}

impl Turn {
    const fn new(id: TurnId) -> Self {
        Self {
            id,
            transcript: String::new(),
            response: String::new(),
            error: None,
        }
    }
}

// ── Orchestrator ───────────────────────────────────────────────────

/// The voice turn orchestrator.
///
/// Owns capture, both workers, the dialogue client, playback, latency and
/// conversation history. Emits [`VoiceEvent`]s on the channel returned by
/// [`new`](Self::new).
pub struct PipelineOrchestrator {
    state: PipelineState,
    turn: Turn,
    next_turn: u64,

    capture: AudioCapture,
    stt: SpeechToTextClient,
    tts: TextToSpeechClient,
    dialogue: DialogueClient,
    dialogue_task: Option<JoinHandle<()>>,
    playback: PlaybackEngine,

    latency: LatencyTracker,
    history: ConversationHistory,
    recording: Option<RecordedAudio>,

    event_tx: mpsc::UnboundedSender<VoiceEvent>,
    internal_tx: mpsc::UnboundedSender<PipelineEvent>,
    internal_rx: mpsc::UnboundedReceiver<PipelineEvent>,
}

impl PipelineOrchestrator {
    /// Create an orchestrator in `Idle`. Workers are not spawned yet.
    #[must_use]
    pub fn new(
        components: PipelineComponents,
        config: &PipelineConfig,
    ) -> (Self, mpsc::UnboundedReceiver<VoiceEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let capacity = config.workers.channel_capacity;

        let orchestrator = Self {
            state: PipelineState::Idle,
            turn: Turn::new(TurnId(0)),
            next_turn: 0,
            capture: AudioCapture::new(components.input, &config.capture),
            stt: SpeechToTextClient::new(components.stt, capacity),
            tts: TextToSpeechClient::new(components.tts, capacity),
            dialogue: DialogueClient::new(components.dialogue, config.dialogue.timeout()),
            dialogue_task: None,
            playback: PlaybackEngine::new(components.output),
            latency: LatencyTracker::new(),
            history: ConversationHistory::new(),
            recording: None,
            event_tx,
            internal_tx,
            internal_rx,
        };

        (orchestrator, event_rx)
    }

    // ── Queries ────────────────────────────────────────────────────

    #[must_use]
    pub const fn state(&self) -> PipelineState {
        self.state
    }

    /// True only while `Listening`.
    #[must_use]
    pub fn is_listening(&self) -> bool {
        self.state == PipelineState::Listening
    }

    /// True from `start_listening` until the turn reaches `Idle` or `Error`.
    #[must_use]
    pub const fn is_processing(&self) -> bool {
        !matches!(self.state, PipelineState::Idle | PipelineState::Error)
    }

    /// True only while `Speaking`.
    #[must_use]
    pub fn is_speaking(&self) -> bool {
        self.state == PipelineState::Speaking
    }

    #[must_use]
    pub const fn turn_id(&self) -> TurnId {
        self.turn.id
    }

    #[must_use]
    pub fn transcript(&self) -> &str {
        &self.turn.transcript
    }

    #[must_use]
    pub fn response(&self) -> &str {
        &self.turn.response
    }

    /// The last error, retained until the next turn starts or `reset`.
    #[must_use]
    pub const fn error(&self) -> Option<&VoiceError> {
        self.turn.error.as_ref()
    }

    #[must_use]
    pub const fn latencies(&self) -> LatencyMetrics {
        self.latency.metrics()
    }

    #[must_use]
    pub const fn history(&self) -> &ConversationHistory {
        &self.history
    }

    /// Recording of the last utterance, once listening has stopped.
    #[must_use]
    pub const fn recording(&self) -> Option<&RecordedAudio> {
        self.recording.as_ref()
    }

    #[must_use]
    pub fn stt_worker_id(&self) -> Option<WorkerId> {
        self.stt.worker_id()
    }

    #[must_use]
    pub fn tts_worker_id(&self) -> Option<WorkerId> {
        self.tts.worker_id()
    }

    // ── Commands ───────────────────────────────────────────────────

    /// Spawn both workers and send them `init`. Idempotent.
    ///
    /// Readiness is reported later through [`next_event`](Self::next_event).
    pub fn initialize(&mut self) -> Result<(), VoiceError> {
        self.stt.initialize()?;
        self.tts.initialize()?;
        tracing::debug!("Voice workers initializing");
        Ok(())
    }

    /// Start a new turn and open the microphone.
    ///
    /// Accepted in `Idle` and `Error`. A device failure ends the new turn in
    /// `Error` and is also returned.
    pub fn start_listening(&mut self) -> Result<(), VoiceError> {
        if !matches!(self.state, PipelineState::Idle | PipelineState::Error) {
            return Err(VoiceError::InvalidTransition {
                from: self.state,
                action: "start listening",
            });
        }

        self.begin_turn();

        if let Err(e) = self.initialize() {
            self.fail(e.clone());
            return Err(e);
        }

        self.stt.discard_buffered();
        if let Err(e) = self.capture.start(self.stt.chunk_sink()) {
            self.fail(e.clone());
            return Err(e);
        }

        tracing::info!(turn = %self.turn.id, "Listening");
        self.set_state(PipelineState::Listening);
        Ok(())
    }

    /// Close the microphone and submit the utterance for transcription.
    pub fn stop_listening(&mut self) -> Result<(), VoiceError> {
        if self.state != PipelineState::Listening {
            return Err(VoiceError::InvalidTransition {
                from: self.state,
                action: "stop listening",
            });
        }

        match self.capture.stop() {
            Ok(Some(recording)) => {
                self.recording = Some(recording.clone());
                self.emit(VoiceEvent::RecordingReady(recording));
            }
            Ok(None) => {}
            Err(e) => {
                self.stt.discard_buffered();
                self.fail(e.clone());
                return Err(e);
            }
        }

        let utterance = self.stt.take_utterance();
        self.set_state(PipelineState::Transcribing);

        if let Err(e) = self.stt.submit(utterance) {
            self.fail(e.clone());
            return Err(e);
        }
        Ok(())
    }

    /// Cancel the current turn and return to `Idle`.
    ///
    /// A busy worker is terminated and respawned; an in-flight dialogue
    /// exchange is abandoned. History is untouched.
    pub fn reset(&mut self) {
        tracing::info!(turn = %self.turn.id, state = ?self.state, "Resetting voice pipeline");

        let (stt_terminated, tts_terminated) = self.terminate_busy_workers();

        self.abandon_dialogue();
        self.release_capture();
        self.stt.discard_buffered();

        self.next_turn += 1;
        self.turn = Turn::new(TurnId(self.next_turn));
        self.latency.reset();
        self.recording = None;
        self.set_state(PipelineState::Idle);

        if stt_terminated {
            if let Err(e) = self.stt.initialize() {
                tracing::warn!(error = %e, "Failed to respawn STT worker");
            }
        }
        if tts_terminated {
            if let Err(e) = self.tts.initialize() {
                tracing::warn!(error = %e, "Failed to respawn TTS worker");
            }
        }
    }

    /// Release every resource: capture, both workers, the dialogue task.
    pub fn shutdown(&mut self) {
        self.abandon_dialogue();
        self.release_capture();
        self.stt.terminate();
        self.tts.terminate();
        self.set_state(PipelineState::Idle);
        tracing::debug!("Voice pipeline shut down");
    }

    // ── Event loop ─────────────────────────────────────────────────

    /// Wait for the next inbound event. Cancel-safe.
    pub async fn next_event(&mut self) -> Option<PipelineEvent> {
        tokio::select! {
            Some(envelope) = self.stt.next_reply() => Some(PipelineEvent::Stt(envelope)),
            Some(envelope) = self.tts.next_reply() => Some(PipelineEvent::Tts(envelope)),
            Some(event) = self.internal_rx.recv() => Some(event),
            else => None,
        }
    }

    /// Drive events until the turn settles in `Idle` or `Error`.
    ///
    /// Returns immediately while `Listening`, which waits on the caller.
    pub async fn run_until_settled(&mut self) -> PipelineState {
        while self.is_processing() && !self.is_listening() {
            let Some(event) = self.next_event().await else {
                break;
            };
            self.handle_event(event);
        }
        self.state
    }

    /// Apply one inbound event. The single entry point for non-command transitions.
    pub fn handle_event(&mut self, event: PipelineEvent) {
        match event {
            PipelineEvent::Stt(envelope) => self.on_stt(envelope),
            PipelineEvent::Tts(envelope) => self.on_tts(envelope),
            PipelineEvent::Dialogue { turn, result } => self.on_dialogue(turn, result),
            PipelineEvent::PlaybackFinished { turn } => self.on_playback_finished(turn),
        }
    }

    // ── Transitions ────────────────────────────────────────────────

    fn on_stt(&mut self, envelope: WorkerEnvelope<SttReply>) {
        let result = match self.stt.accept(envelope) {
            Delivery::Stale | Delivery::Ready => return,
            Delivery::InitFailed(error) => {
                self.on_init_failed(VoiceError::WorkerInit(format!("STT: {error}")));
                return;
            }
            Delivery::Reply(result) => result,
        };

        if self.state != PipelineState::Transcribing {
            tracing::debug!(state = ?self.state, "Ignoring STT reply outside Transcribing");
            return;
        }

        match result {
            Ok(transcript) if transcript.text.trim().is_empty() => {
                self.turn.transcript = transcript.text;
                self.fail(VoiceError::Transcription("No speech detected".to_string()));
            }
            Ok(transcript) => {
                let stt_time = transcript.duration.unwrap_or_default();
                self.latency.record(Stage::Stt, stt_time);
                tracing::info!(
                    turn = %self.turn.id,
                    duration_ms = stt_time.as_millis(),
                    text = %transcript.text,
                    "Transcribed"
                );

                self.turn.transcript.clone_from(&transcript.text);
                self.emit(VoiceEvent::Transcript(transcript.text.clone()));
                self.set_state(PipelineState::Dialoguing);
                self.start_dialogue(transcript.text);
            }
            Err(e) => self.fail(e),
        }
    }

    fn start_dialogue(&mut self, text: String) {
        let client = self.dialogue.clone();
        let events = self.internal_tx.clone();
        let turn = self.turn.id;

        self.dialogue_task = Some(tokio::spawn(async move {
            let result = client.exchange(&text).await;
            let _ = events.send(PipelineEvent::Dialogue { turn, result });
        }));
    }

    fn on_dialogue(&mut self, turn: TurnId, result: Result<DialogueExchange, DialogueError>) {
        if turn != self.turn.id || self.state != PipelineState::Dialoguing {
            tracing::debug!(%turn, current = %self.turn.id, "Discarding abandoned dialogue result");
            return;
        }
        self.dialogue_task = None;

        let exchange = match result {
            Ok(exchange) => exchange,
            Err(e) => {
                self.fail(e.into());
                return;
            }
        };

        self.latency.record(Stage::Api, exchange.round_trip);
        self.history
            .append_exchange(exchange.request, exchange.response.clone());
        tracing::info!(
            turn = %self.turn.id,
            duration_ms = exchange.round_trip.as_millis(),
            history = self.history.len(),
            "Dialogue response received"
        );

        self.turn.response.clone_from(&exchange.response);
        self.emit(VoiceEvent::Response(exchange.response.clone()));
        self.set_state(PipelineState::Synthesizing);

        if let Err(e) = self.tts.submit(exchange.response) {
            self.fail(e);
        }
    }

    fn on_tts(&mut self, envelope: WorkerEnvelope<TtsReply>) {
        let result = match self.tts.accept(envelope) {
            Delivery::Stale | Delivery::Ready => return,
            Delivery::InitFailed(error) => {
                self.on_init_failed(VoiceError::WorkerInit(format!("TTS: {error}")));
                return;
            }
            Delivery::Reply(result) => result,
        };

        if self.state != PipelineState::Synthesizing {
            tracing::debug!(state = ?self.state, "Ignoring TTS reply outside Synthesizing");
            return;
        }

        let audio = match result {
            Ok(audio) => audio,
            Err(e) => {
                self.fail(e);
                return;
            }
        };
        self.latency.record(Stage::Tts, audio.duration);

        let turn = self.turn.id;
        let events = self.internal_tx.clone();
        let on_done = Box::new(move || {
            let _ = events.send(PipelineEvent::PlaybackFinished { turn });
        });

        match self.playback.play(&audio.bytes, on_done) {
            Ok(clip) => {
                tracing::debug!(
                    turn = %turn,
                    synth_ms = audio.duration.as_millis(),
                    clip_ms = clip.as_millis(),
                    "Speaking"
                );
                self.set_state(PipelineState::Speaking);
                self.emit(VoiceEvent::SpeakingStarted);
            }
            Err(e) => self.fail(e),
        }
    }

    fn on_playback_finished(&mut self, turn: TurnId) {
        if turn != self.turn.id || self.state != PipelineState::Speaking {
            tracing::debug!(%turn, current = %self.turn.id, "Ignoring playback completion");
            return;
        }

        self.latency.finish(Instant::now());
        let metrics = self.latency.metrics();
        tracing::info!(
            turn = %turn,
            stt_ms = metrics.stt,
            api_ms = metrics.api,
            tts_ms = metrics.tts,
            total_ms = metrics.total,
            "Turn complete"
        );

        self.emit(VoiceEvent::SpeakingFinished);
        self.emit(VoiceEvent::Latency(metrics));
        self.set_state(PipelineState::Idle);
    }

    // ── Internal helpers ───────────────────────────────────────────

    fn begin_turn(&mut self) {
        // A turn that failed elsewhere can leave a worker request in flight.
        self.terminate_busy_workers();
        self.abandon_dialogue();
        self.next_turn += 1;
        self.turn = Turn::new(TurnId(self.next_turn));
        self.latency.begin(Instant::now());
        self.recording = None;
    }

    /// Terminate any worker with an outstanding request. Returns which ones
    /// (stt, tts) were terminated; their replies become stale.
    fn terminate_busy_workers(&mut self) -> (bool, bool) {
        let stt = self.stt.is_busy();
        if stt {
            self.stt.terminate();
        }
        let tts = self.tts.is_busy();
        if tts {
            self.tts.terminate();
        }
        (stt, tts)
    }

    /// An engine failed to load. Ends the turn if one is running; otherwise
    /// the failure is only reported and the next turn retries the load.
    fn on_init_failed(&mut self, error: VoiceError) {
        if self.is_processing() {
            self.fail(error);
            return;
        }
        tracing::warn!(state = ?self.state, error = %error, "Voice worker failed to load");
        self.emit(VoiceEvent::Error(error.to_string()));
    }

    /// End the turn in `Error`.
    fn fail(&mut self, error: VoiceError) {
        tracing::warn!(
            turn = %self.turn.id,
            state = ?self.state,
            error = %error,
            "Voice turn failed"
        );
        self.release_capture();
        self.emit(VoiceEvent::Error(error.to_string()));
        self.turn.error = Some(error);
        self.set_state(PipelineState::Error);
    }

    fn abandon_dialogue(&mut self) {
        if let Some(task) = self.dialogue_task.take() {
            task.abort();
        }
    }

    fn release_capture(&mut self) {
        if self.capture.is_recording() {
            if let Err(e) = self.capture.stop() {
                tracing::warn!(error = %e, "Failed to finalize discarded recording");
            }
        }
    }

    /// Transition to a new state and emit a state-change event.
    fn set_state(&mut self, new_state: PipelineState) {
        if self.state != new_state {
            tracing::debug!(old = ?self.state, new = ?new_state, turn = %self.turn.id, "Voice state transition");
            self.state = new_state;
            self.emit(VoiceEvent::StateChanged(new_state));
        }
    }

    /// Emit a voice event (best-effort; a dropped receiver is only logged).
    fn emit(&self, event: VoiceEvent) {
        if self.event_tx.send(event).is_err() {
            tracing::trace!("Voice event receiver dropped");
        }
    }
}

impl Drop for PipelineOrchestrator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{CaptureConstraints, FrameSink, InputFormat};
    use crate::dialogue::MockDialogueBackend;
    use crate::playback::ClockOutput;

    struct SilentInput;

    impl InputDevice for SilentInput {
        fn name(&self) -> String {
            "silent".to_string()
        }
        fn open(&mut self, _: &CaptureConstraints) -> Result<InputFormat, VoiceError> {
            Ok(InputFormat {
                sample_rate: 16_000,
                channels: 1,
            })
        }
        fn start(&mut self, mut sink: FrameSink) -> Result<(), VoiceError> {
            sink(&[0.0; 1600]);
            Ok(())
        }
        fn close(&mut self) {}
    }

    fn orchestrator() -> PipelineOrchestrator {
        let config = PipelineConfig::default();
        let components = PipelineComponents {
            input: Box::new(SilentInput),
            stt: backend::stt_factory(&config.stt),
            tts: backend::tts_factory(&config.tts),
            dialogue: Arc::new(MockDialogueBackend::new()),
            output: Box::new(ClockOutput::new()),
        };
        PipelineOrchestrator::new(components, &config).0
    }

    #[tokio::test]
    async fn starts_idle_without_workers() {
        let pipeline = orchestrator();
        assert_eq!(pipeline.state(), PipelineState::Idle);
        assert!(!pipeline.is_processing());
        assert!(pipeline.stt_worker_id().is_none());
        assert!(pipeline.tts_worker_id().is_none());
    }

    #[tokio::test]
    async fn stop_listening_requires_listening() {
        let mut pipeline = orchestrator();
        let err = pipeline.stop_listening().unwrap_err();
        assert!(matches!(
            err,
            VoiceError::InvalidTransition {
                from: PipelineState::Idle,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn start_listening_twice_is_rejected() {
        let mut pipeline = orchestrator();
        pipeline.start_listening().unwrap();
        assert!(pipeline.is_listening());
        assert!(pipeline.is_processing());
        assert!(pipeline.start_listening().is_err());
    }

    #[test]
    fn invalid_transition_message_names_state() {
        let err = VoiceError::InvalidTransition {
            from: PipelineState::Speaking,
            action: "stop listening",
        };
        assert_eq!(err.to_string(), "Cannot stop listening while Speaking");
    }
}
