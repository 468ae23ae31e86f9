//! Audio playback: decodes synthesized WAV and drives an output context.
//!
//! The output context is created lazily on the first clip and then reused
//! for every later turn; it is only released when the engine is dropped.
//! There is no explicit stop: each clip reports completion exactly once,
//! when it finishes naturally.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::audio::{self, DecodedAudio};
use crate::error::VoiceError;

/// Callback invoked when a clip finishes playing.
pub type PlaybackDoneCallback = Box<dyn FnOnce() + Send + 'static>;

/// A long-lived output context (an open speaker stream).
pub trait OutputContext: Send {
    /// Start playing `audio`; call `on_done` once it has drained.
    fn play(&mut self, audio: DecodedAudio, on_done: PlaybackDoneCallback) -> Result<(), VoiceError>;
}

/// Factory for the output context.
pub trait OutputBackend: Send {
    fn name(&self) -> &str;

    fn create_context(&mut self) -> Result<Box<dyn OutputContext>, VoiceError>;
}

// ── Engine ─────────────────────────────────────────────────────────

/// Plays synthesized audio through a lazily created output context.
pub struct PlaybackEngine {
    backend: Box<dyn OutputBackend>,
    context: Option<Box<dyn OutputContext>>,
    contexts_created: usize,
    active_clips: Arc<AtomicUsize>,
}

impl PlaybackEngine {
    pub fn new(backend: Box<dyn OutputBackend>) -> Self {
        Self {
            backend,
            context: None,
            contexts_created: 0,
            active_clips: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Decode `bytes` and start playback. Returns the clip duration.
    ///
    /// Fails with [`VoiceError::Playback`] if the buffer is not decodable
    /// audio or the output context cannot be created.
    pub fn play(&mut self, bytes: &[u8], on_done: PlaybackDoneCallback) -> Result<Duration, VoiceError> {
        let audio = audio::decode_wav(bytes)
            .map_err(|e| VoiceError::Playback(format!("undecodable audio: {e}")))?;
        let duration = audio.duration();

        if self.context.is_none() {
            let context = self.backend.create_context()?;
            self.contexts_created += 1;
            tracing::debug!(backend = self.backend.name(), "Created output context");
            self.context = Some(context);
        }
        let Some(context) = self.context.as_mut() else {
            return Err(VoiceError::Playback("output context unavailable".to_string()));
        };

        let active = Arc::clone(&self.active_clips);
        active.fetch_add(1, Ordering::SeqCst);
        let done_counter = Arc::clone(&active);
        let result = context.play(
            audio,
            Box::new(move || {
                done_counter.fetch_sub(1, Ordering::SeqCst);
                on_done();
            }),
        );
        if let Err(e) = result {
            active.fetch_sub(1, Ordering::SeqCst);
            return Err(e);
        }

        tracing::debug!(duration_ms = duration.as_millis(), "Audio playback started");
        Ok(duration)
    }

    /// Whether any clip is still playing.
    pub fn is_speaking(&self) -> bool {
        self.active_clips.load(Ordering::SeqCst) > 0
    }

    /// How many output contexts have been created so far (at most one).
    pub const fn contexts_created(&self) -> usize {
        self.contexts_created
    }
}

// ── Headless outputs ───────────────────────────────────────────────

/// Output that plays nothing and completes after the clip duration.
///
/// Uses the tokio clock, so paused-time tests see exact durations.
#[derive(Debug, Default)]
pub struct ClockOutput;

impl ClockOutput {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl OutputBackend for ClockOutput {
    fn name(&self) -> &'static str {
        "clock"
    }

    fn create_context(&mut self) -> Result<Box<dyn OutputContext>, VoiceError> {
        Ok(Box::new(ClockContext { dump: None }))
    }
}

/// Output that writes each clip into a directory, then waits it out.
#[derive(Debug)]
pub struct WavDumpOutput {
    dir: PathBuf,
}

impl WavDumpOutput {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl OutputBackend for WavDumpOutput {
    fn name(&self) -> &'static str {
        "wav-dump"
    }

    fn create_context(&mut self) -> Result<Box<dyn OutputContext>, VoiceError> {
        std::fs::create_dir_all(&self.dir)?;
        Ok(Box::new(ClockContext {
            dump: Some((self.dir.clone(), 0)),
        }))
    }
}

struct ClockContext {
    dump: Option<(PathBuf, usize)>,
}

impl OutputContext for ClockContext {
    fn play(&mut self, audio: DecodedAudio, on_done: PlaybackDoneCallback) -> Result<(), VoiceError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| VoiceError::Playback(format!("no async runtime: {e}")))?;

        if let Some((dir, count)) = self.dump.as_mut() {
            *count += 1;
            let path = dir.join(format!("clip-{count:04}.wav"));
            let bytes = audio::encode_wav(&audio.samples, audio.sample_rate, audio.channels)
                .map_err(|e| VoiceError::Playback(format!("failed to encode clip: {e}")))?;
            std::fs::write(&path, bytes)?;
            tracing::info!(path = %path.display(), "Wrote synthesized clip");
        }

        let duration = audio.duration();
        runtime.spawn(async move {
            tokio::time::sleep(duration).await;
            on_done();
        });
        Ok(())
    }
}
