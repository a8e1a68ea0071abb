//! Story reader command-line client.
//!
//! Talks to the story service configured by `STORY_API_URL` (or `--api-url`):
//!
//! ```bash
//! cargo run -p story -- list --limit 4
//! cargo run -p story -- generate --title "Moon Trip" --character Mia --setting "a moon base"
//! cargo run -p story -- play <id>
//! ```

mod args;
mod commands;

use args::{Cli, Commands};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use story_api::{ApiConfig, StoryApi};
use story_core::{CacheConfig, NullAudioBackend, StoryClient};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env before clap reads env-backed flags
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    init_tracing(&cli.log)?;

    let client = build_client(&cli)?;
    match cli.command {
        Commands::List(args) => commands::list(&client, args).await,
        Commands::Show { id } => commands::show(&client, &id).await,
        Commands::Generate(args) => commands::generate(&client, args).await,
        Commands::Delete { id } => commands::delete(&client, &id).await,
        Commands::Play(args) => commands::play(&client, &args.id).await,
    }
}

fn init_tracing(default_filter: &str) -> Result<(), Box<dyn std::error::Error>> {
    let filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(default_filter))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|err| err as Box<dyn std::error::Error>)
}

fn build_client(cli: &Cli) -> Result<StoryClient, Box<dyn std::error::Error>> {
    let mut config = ApiConfig::from_env()?;
    if let Some(url) = &cli.api_url {
        config = config.with_base_url(url.as_str());
    }
    let api = StoryApi::new(config)?;

    let narration = match &cli.command {
        Commands::Play(args) => Duration::from_secs(args.seconds),
        _ => Duration::ZERO,
    };
    let audio = Arc::new(NullAudioBackend::new(narration));

    Ok(StoryClient::new(Arc::new(api), audio, CacheConfig::from_env()?))
}
