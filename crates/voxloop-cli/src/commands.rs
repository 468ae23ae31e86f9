//! CLI command definitions.

use std::net::IpAddr;
use std::path::PathBuf;

use clap::{Args, Subcommand};

/// Available CLI commands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the dialogue endpoint (POST /api/chat)
    Serve(ServeArgs),

    /// Run voice turns: listen, transcribe, ask, speak
    Talk(TalkArgs),

    /// Send one message to the dialogue endpoint
    Ask {
        /// Message text
        text: String,
    },

    /// Transcribe a WAV file through the STT worker
    Transcribe {
        /// WAV file to transcribe
        file: PathBuf,
    },

    /// Synthesize text through the TTS worker
    Speak {
        /// Text to speak
        text: String,

        /// Write the WAV here instead of playing it
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
}

/// Arguments for `serve`.
#[derive(Debug, Args)]
pub struct ServeArgs {
    /// Host to bind
    #[arg(long)]
    pub host: Option<IpAddr>,

    /// Port to bind
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Upstream chat-completions base URL
    #[arg(long, env = "VOXLOOP_UPSTREAM_URL")]
    pub upstream: Option<String>,

    /// Upstream model name
    #[arg(long)]
    pub model: Option<String>,
}

/// Arguments for `talk`.
#[derive(Debug, Args)]
pub struct TalkArgs {
    /// Stream this WAV file instead of the microphone; listening stops at end of file
    #[arg(short, long)]
    pub input: Option<PathBuf>,

    /// Number of turns to run with --input
    #[arg(short, long, default_value_t = 1)]
    pub turns: u32,

    /// Write every spoken clip into this directory instead of the speakers
    #[arg(long)]
    pub dump_dir: Option<PathBuf>,

    /// Write the conversation history as JSON on exit
    #[arg(long)]
    pub history_out: Option<PathBuf>,
}
