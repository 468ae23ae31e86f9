//! Dialogue endpoint for voxloop.
//!
//! `POST /api/chat` takes `{message}` and answers `{response}` by asking an
//! OpenAI-compatible chat-completions API. Failures answer `{error}`.

pub mod config;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod server;
pub mod state;
pub mod upstream;

// Re-export primary types
pub use config::ChatServerConfig;
pub use error::ChatError;
pub use routes::create_router;
pub use server::{serve, start_server};
pub use state::{AppState, ChatContext};
pub use upstream::{CompletionBackend, OpenAiCompletions};
