//! Dedicated audio I/O threads: isolate `!Send` cpal/rodio handles from the async runtime.
//!
//! `cpal::Stream` and `rodio::OutputStream` are `!Send` on some platforms.
//! Each is confined to its own OS thread and driven through std `mpsc`
//! commands with one-shot reply channels, so [`CpalInput`] and
//! [`RodioOutput`] are plain `Send` values the pipeline can own.

use std::sync::mpsc;
use std::thread;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, Stream, StreamConfig};
use rodio::{OutputStream, Sink};

use crate::audio::DecodedAudio;
use crate::capture::{CaptureConstraints, FrameSink, InputDevice, InputFormat};
use crate::error::VoiceError;
use crate::playback::{OutputBackend, OutputContext, PlaybackDoneCallback};

// ── Capture ────────────────────────────────────────────────────────

enum InputCommand {
    Start {
        sink: FrameSink,
        reply: mpsc::Sender<Result<(), VoiceError>>,
    },
    Close,
}

/// Default system microphone via cpal.
///
/// `open` spawns the capture thread and acquires the device on it; `close`
/// drops the stream and joins the thread.
#[derive(Default)]
pub struct CpalInput {
    cmd_tx: Option<mpsc::Sender<InputCommand>>,
    thread: Option<thread::JoinHandle<()>>,
    name: Option<String>,
}

impl CpalInput {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn run(
        constraints: CaptureConstraints,
        cmd_rx: &mpsc::Receiver<InputCommand>,
        init_tx: &mpsc::Sender<Result<(InputFormat, String), VoiceError>>,
    ) {
        let host = cpal::default_host();
        let Some(device) = host.default_input_device() else {
            let _ = init_tx.send(Err(VoiceError::DeviceUnavailable(
                "no audio input device found".to_string(),
            )));
            return;
        };
        let name = device.name().unwrap_or_else(|_| "default input".to_string());

        let config = match pick_input_config(&device, &constraints) {
            Ok(c) => c,
            Err(e) => {
                let _ = init_tx.send(Err(e));
                return;
            }
        };
        let format = InputFormat {
            sample_rate: config.sample_rate().0,
            channels: config.channels(),
        };

        if !constraints.echo_cancellation
            || !constraints.noise_suppression
            || !constraints.auto_gain_control
        {
            tracing::debug!("cpal exposes no DSP toggles; capture constraints are advisory");
        }

        if init_tx.send(Ok((format, name))).is_err() {
            return;
        }

        // The stream lives exactly as long as this loop.
        let mut stream: Option<Stream> = None;
        while let Ok(cmd) = cmd_rx.recv() {
            match cmd {
                InputCommand::Start { sink, reply } => {
                    let result = build_input_stream(&device, &config, sink).and_then(|s| {
                        s.play()
                            .map_err(|e| VoiceError::DeviceUnavailable(e.to_string()))?;
                        Ok(s)
                    });
                    let _ = reply.send(result.map(|s| {
                        stream = Some(s);
                    }));
                }
                InputCommand::Close => break,
            }
        }

        drop(stream);
        tracing::debug!("Capture thread shutting down");
    }
}

impl InputDevice for CpalInput {
    fn name(&self) -> String {
        self.name.clone().unwrap_or_else(|| "cpal default input".to_string())
    }

    fn open(&mut self, constraints: &CaptureConstraints) -> Result<InputFormat, VoiceError> {
        self.close();

        let (cmd_tx, cmd_rx) = mpsc::channel();
        let (init_tx, init_rx) = mpsc::channel();
        let constraints = *constraints;

        let thread = thread::Builder::new()
            .name("voxloop-capture".into())
            .spawn(move || Self::run(constraints, &cmd_rx, &init_tx))
            .map_err(|e| {
                VoiceError::DeviceUnavailable(format!("failed to spawn capture thread: {e}"))
            })?;

        self.cmd_tx = Some(cmd_tx);
        self.thread = Some(thread);

        let (format, name) = init_rx.recv().map_err(|_| {
            VoiceError::DeviceUnavailable("capture thread exited during open".to_string())
        })??;
        self.name = Some(name);
        Ok(format)
    }

    fn start(&mut self, sink: FrameSink) -> Result<(), VoiceError> {
        let cmd_tx = self
            .cmd_tx
            .as_ref()
            .ok_or_else(|| VoiceError::DeviceUnavailable("input device not opened".to_string()))?;
        let (reply, rx) = mpsc::channel();
        cmd_tx
            .send(InputCommand::Start { sink, reply })
            .map_err(|_| VoiceError::DeviceUnavailable("capture thread died".to_string()))?;
        rx.recv()
            .map_err(|_| VoiceError::DeviceUnavailable("capture thread died".to_string()))?
    }

    fn close(&mut self) {
        if let Some(cmd_tx) = self.cmd_tx.take() {
            let _ = cmd_tx.send(InputCommand::Close);
        }
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for CpalInput {
    fn drop(&mut self) {
        self.close();
    }
}

/// Prefer a config at the requested rate and channel count, else the default.
fn pick_input_config(
    device: &cpal::Device,
    constraints: &CaptureConstraints,
) -> Result<cpal::SupportedStreamConfig, VoiceError> {
    let wanted = cpal::SampleRate(constraints.sample_rate);
    if let Ok(ranges) = device.supported_input_configs() {
        for range in ranges {
            if range.channels() == constraints.channels
                && range.min_sample_rate() <= wanted
                && wanted <= range.max_sample_rate()
            {
                return Ok(range.with_sample_rate(wanted));
            }
        }
    }
    device
        .default_input_config()
        .map_err(|e| VoiceError::DeviceUnavailable(e.to_string()))
}

fn build_input_stream(
    device: &cpal::Device,
    config: &cpal::SupportedStreamConfig,
    mut sink: FrameSink,
) -> Result<Stream, VoiceError> {
    let stream_config: StreamConfig = config.clone().into();
    let sample_format = config.sample_format();

    let err_fn = |err: cpal::StreamError| {
        tracing::error!(%err, "Audio input stream error");
    };

    let stream = match sample_format {
        SampleFormat::F32 => device.build_input_stream(
            &stream_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| sink(data),
            err_fn,
            None,
        ),
        SampleFormat::I16 => device.build_input_stream(
            &stream_config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                let frames: Vec<f32> = data.iter().map(|&s| f32::from(s) / 32768.0).collect();
                sink(&frames);
            },
            err_fn,
            None,
        ),
        SampleFormat::I32 => device.build_input_stream(
            &stream_config,
            move |data: &[i32], _: &cpal::InputCallbackInfo| {
                #[allow(clippy::cast_precision_loss)]
                let frames: Vec<f32> = data.iter().map(|&s| s as f32 / 2_147_483_648.0).collect();
                sink(&frames);
            },
            err_fn,
            None,
        ),
        _ => {
            return Err(VoiceError::DeviceUnavailable(format!(
                "Unsupported sample format: {sample_format:?}"
            )));
        }
    };

    stream.map_err(|e| VoiceError::DeviceUnavailable(e.to_string()))
}

// ── Playback ───────────────────────────────────────────────────────

enum OutputCommand {
    Play {
        audio: DecodedAudio,
        on_done: PlaybackDoneCallback,
        reply: mpsc::Sender<Result<(), VoiceError>>,
    },
    Shutdown,
}

/// Default system speaker via rodio.
#[derive(Debug, Default)]
pub struct RodioOutput;

impl RodioOutput {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl OutputBackend for RodioOutput {
    fn name(&self) -> &'static str {
        "rodio"
    }

    fn create_context(&mut self) -> Result<Box<dyn OutputContext>, VoiceError> {
        Ok(Box::new(RodioContext::spawn()?))
    }
}

/// The long-lived output context: one thread holding the `OutputStream`.
struct RodioContext {
    cmd_tx: mpsc::Sender<OutputCommand>,
    thread: Option<thread::JoinHandle<()>>,
}

impl RodioContext {
    fn spawn() -> Result<Self, VoiceError> {
        let (cmd_tx, cmd_rx) = mpsc::channel();
        let (init_tx, init_rx) = mpsc::channel();

        let thread = thread::Builder::new()
            .name("voxloop-playback".into())
            .spawn(move || Self::run(&cmd_rx, &init_tx))
            .map_err(|e| VoiceError::Playback(format!("failed to spawn playback thread: {e}")))?;

        init_rx
            .recv()
            .map_err(|_| VoiceError::Playback("playback thread exited during init".to_string()))??;

        tracing::info!("Audio playback initialized on default output device");
        Ok(Self {
            cmd_tx,
            thread: Some(thread),
        })
    }

    fn run(
        cmd_rx: &mpsc::Receiver<OutputCommand>,
        init_tx: &mpsc::Sender<Result<(), VoiceError>>,
    ) {
        let (_stream, handle) = match OutputStream::try_default() {
            Ok(pair) => pair,
            Err(e) => {
                let _ = init_tx.send(Err(VoiceError::Playback(e.to_string())));
                return;
            }
        };
        if init_tx.send(Ok(())).is_err() {
            return;
        }

        while let Ok(cmd) = cmd_rx.recv() {
            match cmd {
                OutputCommand::Play {
                    audio,
                    on_done,
                    reply,
                } => {
                    let result = Sink::try_new(&handle)
                        .map_err(|e| VoiceError::Playback(e.to_string()))
                        .and_then(|sink| {
                            sink.append(rodio::buffer::SamplesBuffer::new(
                                audio.channels,
                                audio.sample_rate,
                                audio.samples,
                            ));
                            spawn_completion_watcher(
                                thread::Builder::new().name("voxloop-playback-watch".into()),
                                move || sink.sleep_until_end(),
                                on_done,
                            )
                        });
                    let _ = reply.send(result);
                }
                OutputCommand::Shutdown => break,
            }
        }
        tracing::debug!("Playback thread shutting down");
    }
}

/// Block a helper thread on `wait` (the sink draining), then fire `on_done`.
///
/// If the thread cannot be spawned, `on_done` never runs, so the clip is
/// reported as a playback failure instead.
fn spawn_completion_watcher(
    builder: thread::Builder,
    wait: impl FnOnce() + Send + 'static,
    on_done: PlaybackDoneCallback,
) -> Result<(), VoiceError> {
    builder
        .spawn(move || {
            wait();
            tracing::debug!("Playback finished naturally");
            on_done();
        })
        .map(drop)
        .map_err(|e| VoiceError::Playback(format!("failed to spawn playback watcher: {e}")))
}

impl OutputContext for RodioContext {
    fn play(&mut self, audio: DecodedAudio, on_done: PlaybackDoneCallback) -> Result<(), VoiceError> {
        let (reply, rx) = mpsc::channel();
        self.cmd_tx
            .send(OutputCommand::Play {
                audio,
                on_done,
                reply,
            })
            .map_err(|_| VoiceError::Playback("playback thread died".to_string()))?;
        rx.recv()
            .map_err(|_| VoiceError::Playback("playback thread died".to_string()))?
    }
}

impl Drop for RodioContext {
    fn drop(&mut self) {
        let _ = self.cmd_tx.send(OutputCommand::Shutdown);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watcher_fires_completion_after_wait() {
        let (tx, rx) = mpsc::channel();
        spawn_completion_watcher(
            thread::Builder::new(),
            || thread::sleep(std::time::Duration::from_millis(10)),
            Box::new(move || {
                let _ = tx.send(());
            }),
        )
        .unwrap();
        rx.recv_timeout(std::time::Duration::from_secs(5)).unwrap();
    }

    #[test]
    fn watcher_spawn_failure_is_a_playback_error() {
        // No address space can hold this stack.
        let builder = thread::Builder::new().stack_size(usize::MAX / 2);
        let err = spawn_completion_watcher(builder, || {}, Box::new(|| {})).unwrap_err();
        assert!(matches!(err, VoiceError::Playback(_)), "got {err:?}");
    }
}
