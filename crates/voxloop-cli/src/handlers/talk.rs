//! `voxloop talk` - run voice turns.
//!
//! With `--input` the file is streamed as the microphone and each turn ends
//! listening at end of file. Without it, Enter toggles listening, `r`
//! resets and `q` quits.

use std::path::Path;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{Notify, mpsc};
use voxloop_voice::{
    ConversationHistory, PipelineComponents, PipelineOrchestrator, PipelineState, VoiceEvent,
};

use super::{input_device, millis, output_backend};
use crate::bootstrap::CliContext;
use crate::commands::TalkArgs;

pub async fn execute(ctx: &CliContext, args: &TalkArgs) -> Result<()> {
    let (input, end_of_file) = input_device(args.input.as_deref())?;
    let output = output_backend(args.dump_dir.as_deref());
    let components = PipelineComponents::from_config(&ctx.config, input, output);
    let (mut pipeline, mut events) = PipelineOrchestrator::new(components, &ctx.config);
    pipeline.initialize()?;

    let result = match end_of_file {
        Some(eof) => run_file_turns(&mut pipeline, &mut events, &eof, args.turns).await,
        None => run_interactive(&mut pipeline, &mut events).await,
    };

    pipeline.shutdown();
    drain(&mut events);

    if let Some(path) = &args.history_out {
        write_history(pipeline.history(), path)?;
    }
    result
}

async fn run_file_turns(
    pipeline: &mut PipelineOrchestrator,
    events: &mut mpsc::UnboundedReceiver<VoiceEvent>,
    end_of_file: &Notify,
    turns: u32,
) -> Result<()> {
    for turn in 1..=turns {
        tracing::debug!(turn, of = turns, "Starting file turn");
        pipeline.start_listening()?;
        drain(events);

        end_of_file.notified().await;
        pipeline.stop_listening()?;

        let state = pipeline.run_until_settled().await;
        drain(events);
        if state == PipelineState::Error {
            tracing::warn!(turn, "Turn ended in error");
        }
    }
    Ok(())
}

async fn run_interactive(
    pipeline: &mut PipelineOrchestrator,
    events: &mut mpsc::UnboundedReceiver<VoiceEvent>,
) -> Result<()> {
    println!("Enter: start/stop listening | r: reset | q: quit");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("reading stdin")? else {
                    break;
                };
                match line.trim() {
                    "q" => break,
                    "r" => pipeline.reset(),
                    "" => toggle(pipeline),
                    other => println!("Unknown command: {other}"),
                }
            }
            Some(event) = pipeline.next_event() => pipeline.handle_event(event),
            Some(event) = events.recv() => print_event(&event),
        }
    }
    Ok(())
}

fn toggle(pipeline: &mut PipelineOrchestrator) {
    let result = match pipeline.state() {
        PipelineState::Listening => pipeline.stop_listening(),
        PipelineState::Idle | PipelineState::Error => pipeline.start_listening(),
        busy => {
            println!("Busy ({busy:?}); press r to reset");
            Ok(())
        }
    };
    if let Err(e) = result {
        eprintln!("Error: {e}");
    }
}

fn drain(events: &mut mpsc::UnboundedReceiver<VoiceEvent>) {
    while let Ok(event) = events.try_recv() {
        print_event(&event);
    }
}

fn print_event(event: &VoiceEvent) {
    match event {
        VoiceEvent::StateChanged(state) => println!("[{state:?}]"),
        VoiceEvent::Transcript(text) => println!("You: {text}"),
        VoiceEvent::Response(text) => println!("Assistant: {text}"),
        VoiceEvent::Latency(m) => println!(
            "Latency: stt {:.0} ms | api {:.0} ms | tts {:.0} ms | total {:.0} ms",
            m.stt, m.api, m.tts, m.total
        ),
        VoiceEvent::Error(message) => eprintln!("Error: {message}"),
        VoiceEvent::RecordingReady(recording) => {
            println!("Recorded {:.0} ms", millis(recording.duration));
        }
        VoiceEvent::SpeakingStarted | VoiceEvent::SpeakingFinished => {}
    }
}

fn write_history(history: &ConversationHistory, path: &Path) -> Result<()> {
    let json = history.to_json()?;
    std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
    println!("History written to {}", path.display());
    Ok(())
}
