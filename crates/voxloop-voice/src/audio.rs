//! PCM helpers shared by capture, the workers and playback.
//!
//! Two representations of audio travel through the pipeline and must not be
//! mixed up:
//!
//! - raw little-endian `f32` PCM at 16 kHz mono (the STT `audioBuffer`), and
//! - WAV containers (the recorded preview and synthesized speech).

use std::io::Cursor;
use std::time::Duration;

use rubato::{FftFixedIn, Resampler as _};

use crate::error::VoiceError;

/// Sample rate the STT engines expect (16 kHz mono).
pub const STT_SAMPLE_RATE: u32 = 16_000;

/// Input block size fed to the FFT resampler.
const RESAMPLE_BLOCK: usize = 1024;

/// Decoded PCM audio, interleaved when `channels > 1`.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    /// Interleaved f32 samples in `[-1.0, 1.0]`.
    pub samples: Vec<f32>,

    /// Sample rate in Hz.
    pub sample_rate: u32,

    /// Number of interleaved channels.
    pub channels: u16,
}

impl DecodedAudio {
    /// Playback duration of the clip.
    #[must_use]
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 || self.channels == 0 {
            return Duration::ZERO;
        }
        let frames = self.samples.len() / usize::from(self.channels);
        #[allow(clippy::cast_precision_loss)]
        Duration::from_secs_f64(frames as f64 / f64::from(self.sample_rate))
    }
}

// ── Raw PCM bytes ──────────────────────────────────────────────────

/// Serialise samples as little-endian `f32` bytes.
#[must_use]
pub fn samples_to_bytes(samples: &[f32]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Parse little-endian `f32` bytes back into samples.
pub fn bytes_to_samples(bytes: &[u8]) -> Result<Vec<f32>, VoiceError> {
    if bytes.len() % 4 != 0 {
        return Err(VoiceError::Transcription(format!(
            "audio buffer length {} is not a multiple of 4 bytes",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

// ── WAV containers ─────────────────────────────────────────────────

/// Encode samples as a 16-bit PCM WAV file.
pub fn encode_wav(samples: &[f32], sample_rate: u32, channels: u16) -> Result<Vec<u8>, hound::Error> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
        for &sample in samples {
            #[allow(clippy::cast_possible_truncation)]
            let value = (sample.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16;
            writer.write_sample(value)?;
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}

/// Decode a WAV file (integer or float PCM) into f32 samples.
pub fn decode_wav(bytes: &[u8]) -> Result<DecodedAudio, hound::Error> {
    let reader = hound::WavReader::new(Cursor::new(bytes))?;
    let spec = reader.spec();

    let samples = match spec.sample_format {
        hound::SampleFormat::Float => reader.into_samples::<f32>().collect::<Result<Vec<_>, _>>()?,
        hound::SampleFormat::Int => {
            let bits = u32::from(spec.bits_per_sample.clamp(1, 32));
            #[allow(clippy::cast_precision_loss)]
            let scale = (1_u64 << (bits - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| {
                    #[allow(clippy::cast_precision_loss)]
                    s.map(|v| v as f32 / scale)
                })
                .collect::<Result<Vec<_>, _>>()?
        }
    };

    Ok(DecodedAudio {
        samples,
        sample_rate: spec.sample_rate,
        channels: spec.channels,
    })
}

// ── Format conversion ──────────────────────────────────────────────

/// Convert interleaved multi-channel audio to mono by averaging channels.
#[must_use]
pub fn downmix(samples: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    let channels = usize::from(channels);
    samples
        .chunks_exact(channels)
        .map(|frame| {
            #[allow(clippy::cast_precision_loss)]
            let n = channels as f32;
            frame.iter().sum::<f32>() / n
        })
        .collect()
}

/// Incremental FFT resampler for mono streams.
///
/// Input arrives in arbitrarily sized pieces; it is buffered until a full
/// block is available. [`flush`](Self::flush) pads the tail with silence and
/// trims the output to the proportional length.
pub struct StreamResampler {
    inner: FftFixedIn<f32>,
    pending: Vec<f32>,
    from_rate: u32,
    to_rate: u32,
}

impl StreamResampler {
    /// Create a resampler from `from_rate` to `to_rate`.
    pub fn new(from_rate: u32, to_rate: u32) -> Result<Self, VoiceError> {
        let inner = FftFixedIn::<f32>::new(
            from_rate as usize,
            to_rate as usize,
            RESAMPLE_BLOCK,
            2, // sub-chunks for quality
            1, // mono
        )
        .map_err(|e| VoiceError::DeviceUnavailable(format!("resampler setup failed: {e}")))?;

        Ok(Self {
            inner,
            pending: Vec::with_capacity(RESAMPLE_BLOCK * 2),
            from_rate,
            to_rate,
        })
    }

    /// Feed samples; returns whatever output full blocks produced.
    pub fn push(&mut self, samples: &[f32]) -> Vec<f32> {
        self.pending.extend_from_slice(samples);

        let mut output = Vec::new();
        let mut pos = 0;
        while pos + RESAMPLE_BLOCK <= self.pending.len() {
            let block = &self.pending[pos..pos + RESAMPLE_BLOCK];
            match self.inner.process(&[block], None) {
                Ok(result) => {
                    if let Some(channel) = result.first() {
                        output.extend_from_slice(channel);
                    }
                }
                Err(e) => tracing::warn!(error = %e, "Resampler block failed, dropping block"),
            }
            pos += RESAMPLE_BLOCK;
        }
        self.pending.drain(..pos);
        output
    }

    /// Resample the buffered tail, padding with zeros.
    pub fn flush(&mut self) -> Vec<f32> {
        if self.pending.is_empty() {
            return Vec::new();
        }

        let remaining = std::mem::take(&mut self.pending);
        let mut padded = vec![0.0f32; RESAMPLE_BLOCK];
        padded[..remaining.len()].copy_from_slice(&remaining);

        match self.inner.process(&[&padded], None) {
            Ok(result) => result.first().map_or_else(Vec::new, |channel| {
                #[allow(
                    clippy::cast_precision_loss,
                    clippy::cast_possible_truncation,
                    clippy::cast_sign_loss
                )]
                let output_len = (remaining.len() as f64 * f64::from(self.to_rate)
                    / f64::from(self.from_rate))
                .ceil() as usize;
                channel[..output_len.min(channel.len())].to_vec()
            }),
            Err(e) => {
                tracing::warn!(error = %e, "Resampler flush failed, dropping tail");
                Vec::new()
            }
        }
    }
}
