//! `voxloop ask` - one dialogue exchange.

use std::sync::Arc;

use anyhow::Result;
use voxloop_voice::{DialogueClient, HttpDialogueBackend};

use super::millis;
use crate::bootstrap::CliContext;

pub async fn execute(ctx: &CliContext, text: &str) -> Result<()> {
    let dialogue = &ctx.config.dialogue;
    let client = DialogueClient::new(
        Arc::new(HttpDialogueBackend::new(dialogue.endpoint.clone())),
        dialogue.timeout(),
    );

    let exchange = client.exchange(text).await?;
    println!("{}", exchange.response);
    println!("({:.0} ms)", millis(exchange.round_trip));
    Ok(())
}
