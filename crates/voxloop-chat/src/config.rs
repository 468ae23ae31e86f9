//! Chat endpoint configuration.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use serde::{Deserialize, Serialize};

/// Default OpenAI-compatible API base.
pub const DEFAULT_UPSTREAM_BASE: &str = "https://api.openai.com/v1";

/// Default system prompt for the voice assistant.
pub const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a helpful voice assistant. Keep responses concise and conversational.";

/// Reply used when the upstream answers without any content.
pub const DEFAULT_FALLBACK_REPLY: &str = "I'm sorry, I couldn't process that.";

/// Configuration for the chat endpoint and its upstream model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatServerConfig {
    /// Host to bind.
    pub host: IpAddr,

    /// Port to bind.
    pub port: u16,

    /// Base URL of the chat-completions API, without the trailing path.
    pub upstream_base: String,

    /// Bearer token for the upstream.
    pub api_key: Option<String>,

    pub model: String,
    pub system_prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub fallback_reply: String,
}

impl Default for ChatServerConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 3000,
            upstream_base: DEFAULT_UPSTREAM_BASE.to_string(),
            api_key: None,
            model: "gpt-3.5-turbo".to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            max_tokens: 150,
            temperature: 0.7,
            fallback_reply: DEFAULT_FALLBACK_REPLY.to_string(),
        }
    }
}

impl ChatServerConfig {
    /// Socket address to bind.
    #[must_use]
    pub const fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Override the API key from a lookup (normally the process environment).
    pub fn apply_env_with(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup("OPENAI_API_KEY").filter(|k| !k.trim().is_empty()) {
            self.api_key = Some(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_voice_assistant() {
        let config = ChatServerConfig::default();
        assert_eq!(config.model, "gpt-3.5-turbo");
        assert_eq!(config.max_tokens, 150);
        assert!((config.temperature - 0.7).abs() < f32::EPSILON);
        assert_eq!(config.bind_addr().to_string(), "127.0.0.1:3000");
    }

    #[test]
    fn env_key_overrides_and_blank_is_ignored() {
        let mut config = ChatServerConfig::default();
        config.apply_env_with(|_| Some("  ".to_string()));
        assert!(config.api_key.is_none());

        config.apply_env_with(|name| (name == "OPENAI_API_KEY").then(|| "sk-test".to_string()));
        assert_eq!(config.api_key.as_deref(), Some("sk-test"));
    }
}
