//! Server startup.

use std::future::Future;
use std::sync::Arc;

use tokio::net::TcpListener;

use crate::config::ChatServerConfig;
use crate::routes::create_router;
use crate::state::ChatContext;

/// Serve the chat endpoint on `listener` until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    config: ChatServerConfig,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    if config.api_key.is_none() {
        tracing::warn!("No upstream API key configured; requests will likely be rejected");
    }

    let addr = listener.local_addr()?;
    let app = create_router(Arc::new(ChatContext::from_config(config)));
    tracing::info!("voxloop chat endpoint listening on http://{}/api/chat", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
}

/// Bind the configured address and serve until Ctrl-C.
pub async fn start_server(config: ChatServerConfig) -> std::io::Result<()> {
    let listener = TcpListener::bind(config.bind_addr()).await?;
    serve(listener, config, async {
        if tokio::signal::ctrl_c().await.is_err() {
            tracing::warn!("Failed to listen for Ctrl-C");
        }
    })
    .await
}
