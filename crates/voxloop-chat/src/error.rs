//! Chat endpoint errors and their HTTP mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

/// Errors surfaced by the chat endpoint.
#[derive(Debug, Error)]
pub enum ChatError {
    /// The request carried no usable message.
    #[error("Message is required")]
    MissingMessage,

    /// The request body was not valid JSON.
    #[error("Invalid request body: {0}")]
    InvalidBody(String),

    /// The upstream model could not be reached or answered with an error.
    #[error("Upstream model failed: {0}")]
    Upstream(String),
}

/// JSON error response body.
#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::MissingMessage | Self::InvalidBody(_) => {
                (StatusCode::BAD_REQUEST, self.to_string())
            }
            Self::Upstream(detail) => {
                tracing::error!(error = %detail, "Upstream chat completion failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Failed to get response from upstream model".to_string(),
                )
            }
        };

        (status, axum::Json(ErrorBody { error: message })).into_response()
    }
}
