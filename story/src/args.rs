//! Command-line surface for `story`.

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "story", version, about = "Browse, generate and listen to stories", long_about = None)]
pub struct Cli {
    /// Story service base URL, e.g. <http://localhost:8888>
    #[arg(long, env = "STORY_API_URL", global = true)]
    pub api_url: Option<String>,

    /// Default log filter when RUST_LOG is unset
    #[arg(long, default_value = "info", global = true)]
    pub log: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List stories
    List(ListArgs),
    /// Show one story
    Show {
        /// Story id
        id: String,
    },
    /// Generate a new story
    Generate(GenerateArgs),
    /// Delete a story
    Delete {
        /// Story id
        id: String,
    },
    /// Play a story's narration until it ends or Ctrl-C
    Play(PlayArgs),
}

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Oldest first instead of newest first
    #[arg(long)]
    pub oldest: bool,

    /// Show at most this many stories
    #[arg(long)]
    pub limit: Option<usize>,
}

#[derive(Args, Debug)]
pub struct GenerateArgs {
    #[arg(long)]
    pub title: String,

    /// One of 3-5 years, 6-8 years, 9-12 years
    #[arg(long, default_value = "6-8 years")]
    pub age_range: String,

    /// A character name; repeat for more
    #[arg(long = "character", value_name = "NAME")]
    pub characters: Vec<String>,

    #[arg(long)]
    pub setting: String,
}

#[derive(Args, Debug)]
pub struct PlayArgs {
    /// Story id
    pub id: String,

    /// Length of the silent stand-in for the narration, in seconds
    #[arg(long, default_value_t = 30)]
    pub seconds: u64,
}
