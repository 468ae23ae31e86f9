//! CLI entry point - the composition root.
//!
//! Parses arguments, installs logging, resolves configuration and routes to
//! a handler.

use clap::Parser;

use voxloop_cli::{Cli, Commands, bootstrap, handlers, init_tracing};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Parse CLI arguments
    let cli = Cli::parse();

    // Initialize logging
    init_tracing(cli.verbose);

    let context = || {
        bootstrap(cli.config.as_deref(), cli.dialogue_url.as_deref(), |key| {
            std::env::var(key).ok()
        })
    };

    match &cli.command {
        Commands::Serve(args) => handlers::serve::execute(args).await?,
        Commands::Talk(args) => handlers::talk::execute(&context()?, args).await?,
        Commands::Ask { text } => handlers::ask::execute(&context()?, text).await?,
        Commands::Transcribe { file } => handlers::transcribe::execute(&context()?, file).await?,
        Commands::Speak { text, out } => {
            handlers::speak::execute(&context()?, text, out.as_deref()).await?;
        }
    }

    Ok(())
}
