//! Main CLI parser and top-level argument handling.

use std::path::PathBuf;

use clap::Parser;

use crate::commands::Commands;

/// Push-to-talk voice assistant: capture, transcribe, ask, speak.
#[derive(Debug, Parser)]
#[command(name = "voxloop")]
#[command(about = "Push-to-talk voice assistant pipeline")]
#[command(version)]
pub struct Cli {
    /// Pipeline configuration file (TOML)
    #[arg(short = 'c', long = "config", global = true, env = "VOXLOOP_CONFIG")]
    pub config: Option<PathBuf>,

    /// Dialogue endpoint URL, overriding config and environment
    #[arg(long = "dialogue-url", global = true)]
    pub dialogue_url: Option<String>,

    /// Enable verbose/debug output
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}
