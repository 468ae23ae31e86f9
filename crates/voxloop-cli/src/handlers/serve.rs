//! `voxloop serve` - run the dialogue endpoint.

use anyhow::{Context, Result};
use voxloop_chat::ChatServerConfig;

use crate::commands::ServeArgs;

/// Build the server configuration from flags and environment.
pub fn server_config(args: &ServeArgs, lookup: impl Fn(&str) -> Option<String>) -> ChatServerConfig {
    let mut config = ChatServerConfig::default();
    config.apply_env_with(lookup);
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(upstream) = &args.upstream {
        config.upstream_base.clone_from(upstream);
    }
    if let Some(model) = &args.model {
        config.model.clone_from(model);
    }
    config
}

pub async fn execute(args: &ServeArgs) -> Result<()> {
    let config = server_config(args, |key| std::env::var(key).ok());
    let addr = config.bind_addr();
    voxloop_chat::start_server(config)
        .await
        .with_context(|| format!("chat endpoint on {addr} failed"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_defaults() {
        let args = ServeArgs {
            host: Some("0.0.0.0".parse().unwrap()),
            port: Some(8080),
            upstream: Some("http://127.0.0.1:11434/v1".to_string()),
            model: None,
        };
        let config = server_config(&args, |_| Some("sk-test".to_string()));
        assert_eq!(config.bind_addr().to_string(), "0.0.0.0:8080");
        assert_eq!(config.upstream_base, "http://127.0.0.1:11434/v1");
        assert_eq!(config.model, "gpt-3.5-turbo");
        assert_eq!(config.api_key.as_deref(), Some("sk-test"));
    }
}
