//! `voxloop transcribe` - one file through the STT worker.

use std::path::Path;

use anyhow::{Context, Result};
use voxloop_voice::audio::{self, StreamResampler};
use voxloop_voice::{SpeechToTextClient, backend};

use super::millis;
use crate::bootstrap::CliContext;

/// Decode a WAV file into 16 kHz mono STT bytes.
pub fn load_utterance(path: &Path) -> Result<Vec<u8>> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let decoded = audio::decode_wav(&bytes).with_context(|| format!("decoding {}", path.display()))?;

    let mono = audio::downmix(&decoded.samples, decoded.channels);
    let samples = if decoded.sample_rate == audio::STT_SAMPLE_RATE {
        mono
    } else {
        let mut resampler = StreamResampler::new(decoded.sample_rate, audio::STT_SAMPLE_RATE)?;
        let mut out = resampler.push(&mono);
        out.extend(resampler.flush());
        out
    };
    Ok(audio::samples_to_bytes(&samples))
}

pub async fn execute(ctx: &CliContext, file: &Path) -> Result<()> {
    let utterance = load_utterance(file)?;
    let mut client = SpeechToTextClient::new(
        backend::stt_factory(&ctx.config.stt),
        ctx.config.workers.channel_capacity,
    );

    let transcript = client.transcribe(utterance).await?;
    client.terminate();

    println!("{}", transcript.text);
    if let Some(duration) = transcript.duration {
        println!("({:.0} ms)", millis(duration));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stereo_file_becomes_mono_stt_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        let wav = audio::encode_wav(&[0.5; 320], 16_000, 2).unwrap();
        std::fs::write(&path, wav).unwrap();

        let bytes = load_utterance(&path).unwrap();
        assert_eq!(audio::bytes_to_samples(&bytes).unwrap().len(), 160);
    }

    #[test]
    fn non_wav_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("note.txt");
        std::fs::write(&path, b"hello").unwrap();
        assert!(load_utterance(&path).is_err());
    }
}
