//! Chat-completions client for the upstream model.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::ChatServerConfig;
use crate::error::ChatError;

/// A chat message in the request/response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default)]
    pub content: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: Some(content.into()),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: Some(content.into()),
        }
    }
}

/// Request body for `POST /chat/completions`.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// Response from the upstream (non-streaming).
#[derive(Debug, Deserialize)]
pub struct CompletionResponse {
    #[serde(default)]
    pub choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
pub struct CompletionChoice {
    pub message: ChatMessage,
}

impl CompletionResponse {
    /// Content of the first choice, if it has any.
    pub fn first_content(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|c| c.message.content.as_deref())
            .filter(|c| !c.is_empty())
    }
}

/// Something that can answer a completion request.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, ChatError>;
}

/// Client for an OpenAI-compatible chat-completions API.
pub struct OpenAiCompletions {
    client: Client,
    base: String,
    api_key: Option<String>,
}

impl OpenAiCompletions {
    pub fn new(base: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: Client::new(),
            base: base.into(),
            api_key,
        }
    }

    pub fn from_config(config: &ChatServerConfig) -> Self {
        Self::new(config.upstream_base.clone(), config.api_key.clone())
    }

    fn url(&self) -> String {
        format!("{}/chat/completions", self.base.trim_end_matches('/'))
    }
}

#[async_trait]
impl CompletionBackend for OpenAiCompletions {
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, ChatError> {
        let mut builder = self.client.post(self.url()).json(request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ChatError::Upstream(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|e| format!("<failed to read response body: {e}>"));
            return Err(ChatError::Upstream(format!("{status}: {body}")));
        }

        response
            .json::<CompletionResponse>()
            .await
            .map_err(|e| ChatError::Upstream(format!("invalid completion body: {e}")))
    }
}
