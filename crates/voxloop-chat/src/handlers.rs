//! Request handlers.

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::ChatError;
use crate::state::AppState;
use crate::upstream::{ChatMessage, CompletionRequest};

/// Request body for `POST /api/chat`.
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub message: Option<String>,
}

/// Response body for `POST /api/chat`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ChatResponse {
    pub response: String,
}

/// POST /api/chat
///
/// Sends `[system, user]` to the upstream model and returns the first
/// choice, or the configured fallback when the upstream answers empty.
pub async fn chat(
    State(state): State<AppState>,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, ChatError> {
    let Json(request) = body.map_err(|e| ChatError::InvalidBody(e.body_text()))?;
    let message = request
        .message
        .filter(|m| !m.trim().is_empty())
        .ok_or(ChatError::MissingMessage)?;

    let config = &state.config;
    let completion = CompletionRequest {
        model: config.model.clone(),
        messages: vec![
            ChatMessage::system(config.system_prompt.clone()),
            ChatMessage::user(message),
        ],
        max_tokens: config.max_tokens,
        temperature: config.temperature,
    };

    let reply = state.completions.complete(&completion).await?;
    let response = reply
        .first_content()
        .map_or_else(|| config.fallback_reply.clone(), ToString::to_string);

    tracing::debug!(model = %config.model, response_len = response.len(), "Chat completion");
    Ok(Json(ChatResponse { response }))
}

/// GET /health
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
