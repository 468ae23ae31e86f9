//! Audio capture: turns an input device into a stream of fixed-size PCM chunks.
//!
//! An [`InputDevice`] delivers raw interleaved frames at whatever rate it
//! negotiated. [`AudioCapture`] down-mixes them to mono, resamples to the
//! requested rate (16 kHz for STT), cuts the stream into `chunk_samples`
//! blocks and hands each block to a [`ChunkSink`] in capture order. The same
//! samples are accumulated into a WAV [`RecordedAudio`] for preview.
//!
//! Resource discipline: the device is closed on `stop()`, on every failed
//! `start()` and on drop. Nothing outlives the recording session.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::{Notify, mpsc};

use crate::audio::{self, DecodedAudio, StreamResampler};
use crate::config::CaptureSettings;
use crate::error::VoiceError;

// ── Types ──────────────────────────────────────────────────────────

/// Processing requested from the input device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConstraints {
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,

    /// Rate of the emitted chunks, in Hz.
    pub sample_rate: u32,

    /// Channels of the emitted chunks. Only mono is produced.
    pub channels: u16,
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self {
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
            sample_rate: audio::STT_SAMPLE_RATE,
            channels: 1,
        }
    }
}

/// The format a device actually delivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

/// Callback receiving interleaved f32 frames from a device.
pub type FrameSink = Box<dyn FnMut(&[f32]) + Send + 'static>;

/// One block of mono PCM handed to the STT client.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    /// Position in the capture stream, starting at 0 per recording.
    pub seq: u64,
    pub samples: Vec<f32>,
    pub captured_at: Instant,
}

/// Destination of captured chunks. Ownership of each chunk moves on send.
pub type ChunkSink = mpsc::UnboundedSender<AudioChunk>;

/// Finalized recording of a whole utterance (WAV, 16-bit mono).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedAudio {
    pub bytes: Vec<u8>,
    pub duration: Duration,
}

// ── Device trait ───────────────────────────────────────────────────

/// A source of microphone frames.
pub trait InputDevice: Send {
    /// Human-readable device name.
    fn name(&self) -> String;

    /// Acquire the device and negotiate a format.
    ///
    /// Fails with [`VoiceError::DeviceUnavailable`] when no device exists or
    /// access is denied.
    fn open(&mut self, constraints: &CaptureConstraints) -> Result<InputFormat, VoiceError>;

    /// Begin delivering frames to `sink`.
    fn start(&mut self, sink: FrameSink) -> Result<(), VoiceError>;

    /// Stop delivery and release everything acquired by `open`/`start`.
    ///
    /// Must be safe to call in any state, any number of times. No frame may
    /// be delivered after it returns.
    fn close(&mut self);
}

// ── Session ────────────────────────────────────────────────────────

struct CaptureSession {
    format: InputFormat,
    resampler: Option<StreamResampler>,
    chunk_samples: usize,
    pending: Vec<f32>,
    recorded: Vec<f32>,
    next_seq: u64,
    sink: ChunkSink,
    active: bool,
}

impl CaptureSession {
    fn push_frames(&mut self, frames: &[f32]) {
        if !self.active {
            return;
        }
        let mono = audio::downmix(frames, self.format.channels);
        let samples = match self.resampler.as_mut() {
            Some(resampler) => resampler.push(&mono),
            None => mono,
        };
        self.append(&samples);
    }

    fn append(&mut self, samples: &[f32]) {
        self.recorded.extend_from_slice(samples);
        self.pending.extend_from_slice(samples);
        while self.pending.len() >= self.chunk_samples {
            let rest = self.pending.split_off(self.chunk_samples);
            let block = std::mem::replace(&mut self.pending, rest);
            self.emit(block);
        }
    }

    /// Flush the resampler tail and the final partial chunk.
    fn finish(&mut self) -> Vec<f32> {
        if !self.active {
            return Vec::new();
        }
        if let Some(resampler) = self.resampler.as_mut() {
            let tail = resampler.flush();
            self.append(&tail);
        }
        if !self.pending.is_empty() {
            let block = std::mem::take(&mut self.pending);
            self.emit(block);
        }
        self.active = false;
        std::mem::take(&mut self.recorded)
    }

    fn emit(&mut self, samples: Vec<f32>) {
        let chunk = AudioChunk {
            seq: self.next_seq,
            samples,
            captured_at: Instant::now(),
        };
        self.next_seq += 1;
        if self.sink.send(chunk).is_err() {
            tracing::trace!("Chunk receiver dropped");
        }
    }
}

fn lock(session: &Mutex<CaptureSession>) -> MutexGuard<'_, CaptureSession> {
    session.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── AudioCapture ───────────────────────────────────────────────────

/// Owns one input device for one recording session at a time.
pub struct AudioCapture {
    device: Box<dyn InputDevice>,
    constraints: CaptureConstraints,
    chunk_samples: usize,
    session: Option<Arc<Mutex<CaptureSession>>>,
}

impl AudioCapture {
    pub fn new(device: Box<dyn InputDevice>, settings: &CaptureSettings) -> Self {
        Self {
            device,
            constraints: settings.constraints,
            chunk_samples: settings.chunk_samples.max(1),
            session: None,
        }
    }

    /// Whether a recording session is running.
    pub const fn is_recording(&self) -> bool {
        self.session.is_some()
    }

    /// Open the device and start emitting chunks to `sink`.
    pub fn start(&mut self, sink: ChunkSink) -> Result<(), VoiceError> {
        if self.session.is_some() {
            return Err(VoiceError::CaptureActive);
        }

        let result = self.try_start(sink);
        if result.is_err() {
            self.device.close();
        }
        result
    }

    fn try_start(&mut self, sink: ChunkSink) -> Result<(), VoiceError> {
        let format = self.device.open(&self.constraints)?;
        if format.sample_rate == 0 || format.channels == 0 {
            return Err(VoiceError::DeviceUnavailable(format!(
                "device reported an unusable format: {format:?}"
            )));
        }

        let resampler = if format.sample_rate == self.constraints.sample_rate {
            None
        } else {
            Some(StreamResampler::new(
                format.sample_rate,
                self.constraints.sample_rate,
            )?)
        };

        let session = Arc::new(Mutex::new(CaptureSession {
            format,
            resampler,
            chunk_samples: self.chunk_samples,
            pending: Vec::with_capacity(self.chunk_samples),
            recorded: Vec::new(),
            next_seq: 0,
            sink,
            active: true,
        }));

        let writer = Arc::clone(&session);
        self.device.start(Box::new(move |frames: &[f32]| {
            lock(&writer).push_frames(frames);
        }))?;

        tracing::info!(
            device = %self.device.name(),
            device_rate = format.sample_rate,
            device_channels = format.channels,
            target_rate = self.constraints.sample_rate,
            chunk_samples = self.chunk_samples,
            "Audio capture started"
        );

        self.session = Some(session);
        Ok(())
    }

    /// Stop capturing and finalize the recording.
    ///
    /// The device is released before anything else happens, even if
    /// encoding then fails. Returns `Ok(None)` when not recording.
    pub fn stop(&mut self) -> Result<Option<RecordedAudio>, VoiceError> {
        let Some(session) = self.session.take() else {
            return Ok(None);
        };
        self.device.close();

        let samples = lock(&session).finish();
        let rate = self.constraints.sample_rate;
        let bytes = audio::encode_wav(&samples, rate, 1)
            .map_err(|e| VoiceError::Io(format!("failed to encode recording: {e}")))?;

        #[allow(clippy::cast_precision_loss)]
        let duration = Duration::from_secs_f64(samples.len() as f64 / f64::from(rate));
        tracing::debug!(
            samples = samples.len(),
            duration_ms = duration.as_millis(),
            "Audio capture stopped"
        );

        Ok(Some(RecordedAudio { bytes, duration }))
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        if self.session.take().is_some() {
            self.device.close();
        }
    }
}

// ── WAV file input ─────────────────────────────────────────────────

/// Frames delivered per callback by [`WavFileInput`] (20 ms at 16 kHz).
const WAV_FRAME_SAMPLES: usize = 320;

/// Streams a WAV file as if it were a microphone.
///
/// With `realtime` the file is paced at its natural rate; otherwise it is
/// delivered as fast as the sink accepts it. [`completion`](Self::completion)
/// is notified once the whole file has been delivered.
pub struct WavFileInput {
    path: PathBuf,
    realtime: bool,
    decoded: Option<DecodedAudio>,
    stop: Arc<AtomicBool>,
    finished: Arc<Notify>,
    thread: Option<thread::JoinHandle<()>>,
}

impl WavFileInput {
    pub fn new(path: impl AsRef<Path>, realtime: bool) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            realtime,
            decoded: None,
            stop: Arc::new(AtomicBool::new(false)),
            finished: Arc::new(Notify::new()),
            thread: None,
        }
    }

    /// Notified when the file has been fully delivered.
    pub fn completion(&self) -> Arc<Notify> {
        Arc::clone(&self.finished)
    }
}

impl InputDevice for WavFileInput {
    fn name(&self) -> String {
        format!("wav:{}", self.path.display())
    }

    fn open(&mut self, constraints: &CaptureConstraints) -> Result<InputFormat, VoiceError> {
        let bytes = std::fs::read(&self.path).map_err(|e| {
            VoiceError::DeviceUnavailable(format!("cannot read {}: {e}", self.path.display()))
        })?;
        let decoded = audio::decode_wav(&bytes).map_err(|e| {
            VoiceError::DeviceUnavailable(format!("{} is not a WAV file: {e}", self.path.display()))
        })?;

        tracing::debug!(
            path = %self.path.display(),
            sample_rate = decoded.sample_rate,
            channels = decoded.channels,
            requested_rate = constraints.sample_rate,
            "Opened WAV input"
        );

        let format = InputFormat {
            sample_rate: decoded.sample_rate,
            channels: decoded.channels,
        };
        self.decoded = Some(decoded);
        Ok(format)
    }

    fn start(&mut self, mut sink: FrameSink) -> Result<(), VoiceError> {
        let decoded = self
            .decoded
            .take()
            .ok_or_else(|| VoiceError::DeviceUnavailable("WAV input not opened".to_string()))?;

        self.stop.store(false, Ordering::SeqCst);
        let stop = Arc::clone(&self.stop);
        let finished = Arc::clone(&self.finished);
        let realtime = self.realtime;

        let frame_len = WAV_FRAME_SAMPLES * usize::from(decoded.channels.max(1));
        #[allow(clippy::cast_precision_loss)]
        let frame_period = Duration::from_secs_f64(
            WAV_FRAME_SAMPLES as f64 / f64::from(decoded.sample_rate.max(1)),
        );

        let handle = thread::Builder::new()
            .name("voxloop-wav-input".into())
            .spawn(move || {
                for frame in decoded.samples.chunks(frame_len) {
                    if stop.load(Ordering::SeqCst) {
                        return;
                    }
                    sink(frame);
                    if realtime {
                        thread::sleep(frame_period);
                    }
                }
                finished.notify_one();
            })
            .map_err(|e| VoiceError::DeviceUnavailable(format!("failed to spawn reader: {e}")))?;

        self.thread = Some(handle);
        Ok(())
    }

    fn close(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
        self.decoded = None;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    /// Delivers a fixed set of frames synchronously from `start`.
    struct ScriptedDevice {
        format: InputFormat,
        frames: Vec<Vec<f32>>,
        fail_open: bool,
        fail_start: bool,
        closes: Arc<AtomicUsize>,
    }

    impl ScriptedDevice {
        fn new(frames: Vec<Vec<f32>>) -> (Self, Arc<AtomicUsize>) {
            let closes = Arc::new(AtomicUsize::new(0));
            let device = Self {
                format: InputFormat {
                    sample_rate: 16_000,
                    channels: 1,
                },
                frames,
                fail_open: false,
                fail_start: false,
                closes: Arc::clone(&closes),
            };
            (device, closes)
        }
    }

    impl InputDevice for ScriptedDevice {
        fn name(&self) -> String {
            "scripted".to_string()
        }

        fn open(&mut self, _: &CaptureConstraints) -> Result<InputFormat, VoiceError> {
            if self.fail_open {
                return Err(VoiceError::DeviceUnavailable("permission denied".into()));
            }
            Ok(self.format)
        }

        fn start(&mut self, mut sink: FrameSink) -> Result<(), VoiceError> {
            if self.fail_start {
                return Err(VoiceError::DeviceUnavailable("stream failed".into()));
            }
            for frame in &self.frames {
                sink(frame);
            }
            Ok(())
        }

        fn close(&mut self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn settings(chunk_samples: usize) -> CaptureSettings {
        CaptureSettings {
            chunk_samples,
            ..CaptureSettings::default()
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<AudioChunk>) -> Vec<AudioChunk> {
        let mut chunks = Vec::new();
        while let Ok(chunk) = rx.try_recv() {
            chunks.push(chunk);
        }
        chunks
    }

    #[test]
    fn chunks_are_fixed_size_and_ordered() {
        let (device, closes) = ScriptedDevice::new(vec![vec![0.1; 300], vec![0.2; 300]]);
        let mut capture = AudioCapture::new(Box::new(device), &settings(256));
        let (tx, mut rx) = mpsc::unbounded_channel();

        capture.start(tx).unwrap();
        let during = drain(&mut rx);
        assert_eq!(during.len(), 2);
        assert!(during.iter().all(|c| c.samples.len() == 256));

        let recording = capture.stop().unwrap().unwrap();
        let tail = drain(&mut rx);
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].samples.len(), 600 - 512);

        let seqs: Vec<u64> = during.iter().chain(&tail).map(|c| c.seq).collect();
        assert_eq!(seqs, vec![0, 1, 2]);

        assert_eq!(&recording.bytes[..4], b"RIFF");
        assert_eq!(recording.duration, Duration::from_secs_f64(600.0 / 16_000.0));
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn stop_when_idle_is_a_noop() {
        let (device, closes) = ScriptedDevice::new(vec![]);
        let mut capture = AudioCapture::new(Box::new(device), &settings(256));
        assert!(capture.stop().unwrap().is_none());
        assert_eq!(closes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn failed_open_releases_device() {
        let (mut device, closes) = ScriptedDevice::new(vec![]);
        device.fail_open = true;
        let mut capture = AudioCapture::new(Box::new(device), &settings(256));
        let (tx, _rx) = mpsc::unbounded_channel();

        let err = capture.start(tx).unwrap_err();
        assert!(matches!(err, VoiceError::DeviceUnavailable(_)));
        assert!(!capture.is_recording());
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failed_start_releases_device() {
        let (mut device, closes) = ScriptedDevice::new(vec![]);
        device.fail_start = true;
        let mut capture = AudioCapture::new(Box::new(device), &settings(256));
        let (tx, _rx) = mpsc::unbounded_channel();

        assert!(capture.start(tx).is_err());
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn second_start_is_rejected() {
        let (device, _closes) = ScriptedDevice::new(vec![]);
        let mut capture = AudioCapture::new(Box::new(device), &settings(256));
        let (tx, _rx) = mpsc::unbounded_channel();

        capture.start(tx.clone()).unwrap();
        assert!(matches!(capture.start(tx), Err(VoiceError::CaptureActive)));
    }

    #[test]
    fn stereo_input_is_downmixed() {
        let (mut device, _closes) = ScriptedDevice::new(vec![vec![1.0, 0.0, 1.0, 0.0]]);
        device.format.channels = 2;
        let mut capture = AudioCapture::new(Box::new(device), &settings(16));
        let (tx, mut rx) = mpsc::unbounded_channel();

        capture.start(tx).unwrap();
        capture.stop().unwrap();
        let chunks = drain(&mut rx);
        assert_eq!(chunks[0].samples, vec![0.5, 0.5]);
    }

    #[test]
    fn drop_releases_running_device() {
        let (device, closes) = ScriptedDevice::new(vec![]);
        let mut capture = AudioCapture::new(Box::new(device), &settings(256));
        let (tx, _rx) = mpsc::unbounded_channel();
        capture.start(tx).unwrap();

        drop(capture);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn wav_file_input_streams_whole_file() {
        let samples = vec![0.25f32; 1000];
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), audio::encode_wav(&samples, 16_000, 1).unwrap()).unwrap();

        let input = WavFileInput::new(file.path(), false);
        let done = input.completion();
        let mut capture = AudioCapture::new(Box::new(input), &settings(4096));
        let (tx, mut rx) = mpsc::unbounded_channel();

        capture.start(tx).unwrap();
        done.notified().await;
        let recording = capture.stop().unwrap().unwrap();

        let total: usize = drain(&mut rx).iter().map(|c| c.samples.len()).sum();
        assert_eq!(total, 1000);
        assert_eq!(recording.duration, Duration::from_secs_f64(1000.0 / 16_000.0));
    }

    #[test]
    fn missing_wav_file_is_device_unavailable() {
        let mut input = WavFileInput::new("/definitely/not/here.wav", false);
        let err = input.open(&CaptureConstraints::default()).unwrap_err();
        assert!(matches!(err, VoiceError::DeviceUnavailable(_)));
    }
}
