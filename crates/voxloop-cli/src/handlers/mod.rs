//! Command handlers.

pub mod ask;
pub mod serve;
pub mod speak;
pub mod talk;
pub mod transcribe;

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::Notify;
use voxloop_voice::{InputDevice, OutputBackend, WavDumpOutput, WavFileInput};

/// The input device for a session, plus an end-of-file signal for file input.
pub fn input_device(wav: Option<&Path>) -> Result<(Box<dyn InputDevice>, Option<Arc<Notify>>)> {
    if let Some(path) = wav {
        let input = WavFileInput::new(path, true);
        let done = input.completion();
        return Ok((Box::new(input), Some(done)));
    }

    #[cfg(feature = "local-audio")]
    {
        Ok((Box::new(voxloop_voice::CpalInput::new()), None))
    }

    #[cfg(not(feature = "local-audio"))]
    {
        anyhow::bail!("no microphone support in this build: pass --input <wav> or rebuild with --features local-audio")
    }
}

/// The output backend: a dump directory, the speakers, or the clock.
pub fn output_backend(dump_dir: Option<&Path>) -> Box<dyn OutputBackend> {
    if let Some(dir) = dump_dir {
        return Box::new(WavDumpOutput::new(dir));
    }

    #[cfg(feature = "local-audio")]
    {
        Box::new(voxloop_voice::RodioOutput::new())
    }

    #[cfg(not(feature = "local-audio"))]
    {
        tracing::info!("No speaker support in this build; playback is timed only");
        Box::new(voxloop_voice::ClockOutput::new())
    }
}

/// Milliseconds for display.
#[allow(clippy::cast_precision_loss)]
pub fn millis(duration: std::time::Duration) -> f64 {
    duration.as_micros() as f64 / 1000.0
}
