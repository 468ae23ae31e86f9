//! Shared application state type.

use std::sync::Arc;

use crate::config::ChatServerConfig;
use crate::upstream::{CompletionBackend, OpenAiCompletions};

/// Everything a handler needs: the upstream client and the prompt settings.
pub struct ChatContext {
    pub config: ChatServerConfig,
    pub completions: Arc<dyn CompletionBackend>,
}

impl ChatContext {
    pub fn new(config: ChatServerConfig, completions: Arc<dyn CompletionBackend>) -> Self {
        Self {
            config,
            completions,
        }
    }

    /// Context talking to the configured upstream over HTTP.
    pub fn from_config(config: ChatServerConfig) -> Self {
        let completions = Arc::new(OpenAiCompletions::from_config(&config));
        Self::new(config, completions)
    }
}

/// Application state shared across all handlers.
pub type AppState = Arc<ChatContext>;
