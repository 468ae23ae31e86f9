//! `voxloop speak` - one text through the TTS worker.

use std::path::Path;

use anyhow::{Context, Result};
use tokio::sync::oneshot;
use voxloop_voice::{PlaybackEngine, TextToSpeechClient, backend};

use super::{millis, output_backend};
use crate::bootstrap::CliContext;

pub async fn execute(ctx: &CliContext, text: &str, out: Option<&Path>) -> Result<()> {
    let mut client = TextToSpeechClient::new(
        backend::tts_factory(&ctx.config.tts),
        ctx.config.workers.channel_capacity,
    );
    let audio = client.synthesize(text).await?;
    client.terminate();
    println!("Synthesized in {:.0} ms", millis(audio.duration));

    if let Some(path) = out {
        std::fs::write(path, &audio.bytes).with_context(|| format!("writing {}", path.display()))?;
        println!("Wrote {}", path.display());
        return Ok(());
    }

    let mut playback = PlaybackEngine::new(output_backend(None));
    let (done_tx, done_rx) = oneshot::channel();
    let clip = playback.play(
        &audio.bytes,
        Box::new(move || {
            let _ = done_tx.send(());
        }),
    )?;
    tracing::debug!(clip_ms = clip.as_millis(), "Playing");
    done_rx.await.context("playback ended without completing")?;
    Ok(())
}
