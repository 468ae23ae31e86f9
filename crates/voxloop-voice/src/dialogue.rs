//! Dialogue client: one request/response exchange with the text-generation endpoint.
//!
//! Wire contract: `POST {message}` answered by `200 {response}`, or by a
//! non-200 status with `{error}`. The client never sends an empty message
//! and never waits longer than its configured timeout. It does not touch
//! conversation history; the orchestrator appends after a success.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::error::DialogueError;

/// One completed exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialogueExchange {
    pub request: String,
    pub response: String,
    pub round_trip: Duration,
}

/// Transport for a single exchange.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DialogueBackend: Send + Sync {
    async fn exchange(&self, message: &str) -> Result<String, DialogueError>;
}

// ── HTTP backend ───────────────────────────────────────────────────

#[derive(Serialize)]
struct ChatRequest<'a> {
    message: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    response: String,
}

#[derive(Deserialize)]
struct ChatErrorBody {
    error: String,
}

/// Posts `{message}` as JSON to a chat endpoint.
pub struct HttpDialogueBackend {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpDialogueBackend {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl DialogueBackend for HttpDialogueBackend {
    async fn exchange(&self, message: &str) -> Result<String, DialogueError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&ChatRequest { message })
            .send()
            .await
            .map_err(|e| DialogueError::Upstream {
                status: e.status().map(|s| s.as_u16()),
                message: e.to_string(),
            })?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            let message = upstream_message(status, response.text().await);
            return Err(DialogueError::Upstream {
                status: Some(status.as_u16()),
                message,
            });
        }

        let parsed: ChatResponse =
            response
                .json()
                .await
                .map_err(|e| DialogueError::Upstream {
                    status: Some(status.as_u16()),
                    message: format!("invalid response body: {e}"),
                })?;
        Ok(parsed.response)
    }
}

/// Error text for a non-200 answer: the `{error}` field when present,
/// otherwise the raw body, the status reason, or the body read failure.
fn upstream_message(
    status: reqwest::StatusCode,
    body: Result<String, impl std::fmt::Display>,
) -> String {
    let reason = status.canonical_reason().unwrap_or("error");
    match body {
        Err(e) => format!("{reason} (failed to read response body: {e})"),
        Ok(body) => serde_json::from_str::<ChatErrorBody>(&body).map_or_else(
            |_| if body.is_empty() { reason.to_string() } else { body },
            |b| b.error,
        ),
    }
}

// ── Client ─────────────────────────────────────────────────────────

/// Bounded-wait wrapper over a [`DialogueBackend`].
#[derive(Clone)]
pub struct DialogueClient {
    backend: Arc<dyn DialogueBackend>,
    timeout: Duration,
}

impl DialogueClient {
    pub fn new(backend: Arc<dyn DialogueBackend>, timeout: Duration) -> Self {
        Self { backend, timeout }
    }

    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run one exchange and measure its round trip.
    pub async fn exchange(&self, text: &str) -> Result<DialogueExchange, DialogueError> {
        if text.trim().is_empty() {
            return Err(DialogueError::EmptyMessage);
        }

        let started = Instant::now();
        let response = tokio::time::timeout(self.timeout, self.backend.exchange(text))
            .await
            .map_err(|_| DialogueError::Timeout {
                after: self.timeout,
            })??;
        let round_trip = started.elapsed();

        tracing::debug!(
            round_trip_ms = round_trip.as_millis(),
            response_len = response.len(),
            "Dialogue exchange complete"
        );

        Ok(DialogueExchange {
            request: text.to_string(),
            response,
            round_trip,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_message_is_never_sent() {
        let mut backend = MockDialogueBackend::new();
        backend.expect_exchange().never();

        let client = DialogueClient::new(Arc::new(backend), Duration::from_secs(1));
        assert!(matches!(
            client.exchange("   ").await,
            Err(DialogueError::EmptyMessage)
        ));
    }

    #[tokio::test]
    async fn success_carries_request_and_response() {
        let mut backend = MockDialogueBackend::new();
        backend
            .expect_exchange()
            .withf(|message: &str| message == "hello")
            .times(1)
            .returning(|_| Ok("Hi there!".to_string()));

        let client = DialogueClient::new(Arc::new(backend), Duration::from_secs(1));
        let exchange = client.exchange("hello").await.unwrap();
        assert_eq!(exchange.request, "hello");
        assert_eq!(exchange.response, "Hi there!");
    }

    #[tokio::test]
    async fn upstream_errors_pass_through() {
        let mut backend = MockDialogueBackend::new();
        backend.expect_exchange().returning(|_| {
            Err(DialogueError::Upstream {
                status: Some(500),
                message: "Failed to get response".to_string(),
            })
        });

        let client = DialogueClient::new(Arc::new(backend), Duration::from_secs(1));
        let err = client.exchange("hello").await.unwrap_err();
        assert!(matches!(err, DialogueError::Upstream { status: Some(500), .. }));
    }

    #[test]
    fn upstream_message_prefers_error_field() {
        let status = reqwest::StatusCode::BAD_REQUEST;
        let body: Result<String, &str> = Ok(r#"{"error":"Message is required"}"#.to_string());
        assert_eq!(upstream_message(status, body), "Message is required");

        let empty: Result<String, &str> = Ok(String::new());
        assert_eq!(upstream_message(status, empty), "Bad Request");
    }

    #[test]
    fn unreadable_body_is_reported() {
        let status = reqwest::StatusCode::INTERNAL_SERVER_ERROR;
        let message = upstream_message(status, Err::<String, _>("connection reset"));
        assert_eq!(
            message,
            "Internal Server Error (failed to read response body: connection reset)"
        );
    }

    struct SlowBackend(Duration);

    #[async_trait]
    impl DialogueBackend for SlowBackend {
        async fn exchange(&self, _message: &str) -> Result<String, DialogueError> {
            tokio::time::sleep(self.0).await;
            Ok("late".to_string())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_endpoint_times_out() {
        let client = DialogueClient::new(
            Arc::new(SlowBackend(Duration::from_secs(5))),
            Duration::from_millis(250),
        );
        let err = client.exchange("hello").await.unwrap_err();
        assert!(matches!(err, DialogueError::Timeout { after } if after == Duration::from_millis(250)));
    }

    #[tokio::test(start_paused = true)]
    async fn round_trip_is_measured() {
        let client = DialogueClient::new(
            Arc::new(SlowBackend(Duration::from_millis(80))),
            Duration::from_secs(1),
        );
        let exchange = client.exchange("hello").await.unwrap();
        assert_eq!(exchange.round_trip, Duration::from_millis(80));
    }
}
