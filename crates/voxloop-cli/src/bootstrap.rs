//! CLI bootstrap - the composition root.
//!
//! Loads `.env`, the optional TOML file and environment overrides into one
//! [`PipelineConfig`], and installs the tracing subscriber.

use std::path::Path;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;
use voxloop_voice::PipelineConfig;

/// Fully resolved configuration for CLI commands.
#[derive(Debug, Clone)]
pub struct CliContext {
    pub config: PipelineConfig,
}

/// Install the global subscriber. `RUST_LOG` wins over `verbose`.
pub fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Resolve configuration: file, then environment, then explicit flags.
pub fn bootstrap(
    config_path: Option<&Path>,
    dialogue_url: Option<&str>,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<CliContext> {
    let mut config = match config_path {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    config.apply_env_with(lookup);
    if let Some(url) = dialogue_url {
        config.dialogue.endpoint = url.to_string();
    }
    config.validate().context("invalid pipeline configuration")?;

    tracing::debug!(
        dialogue = %config.dialogue.endpoint,
        stt = ?config.stt.engine,
        tts = ?config.tts.engine,
        "Configuration resolved"
    );
    Ok(CliContext { config })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_overrides_environment() {
        let ctx = bootstrap(None, Some("http://10.0.0.2:3000/api/chat"), |key| {
            (key == "VOXLOOP_DIALOGUE_URL").then(|| "http://env:3000/api/chat".to_string())
        })
        .unwrap();
        assert_eq!(ctx.config.dialogue.endpoint, "http://10.0.0.2:3000/api/chat");
    }

    #[test]
    fn file_then_environment() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("voxloop.toml");
        std::fs::write(&path, "[dialogue]\ntimeout_ms = 500\n").unwrap();

        let ctx = bootstrap(Some(&path), None, |key| {
            (key == "OPENAI_API_KEY").then(|| "sk-test".to_string())
        })
        .unwrap();
        assert_eq!(ctx.config.dialogue.timeout_ms, 500);
        assert_eq!(ctx.config.tts.api_key.as_deref(), Some("sk-test"));
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = bootstrap(Some(Path::new("/nonexistent/voxloop.toml")), None, |_| None)
            .unwrap_err();
        assert!(err.to_string().contains("loading"));
    }
}
