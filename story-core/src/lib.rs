//! Story cache, mutations and audio playback for the story reader.
//!
//! This crate provides:
//! - A read-through story cache with request sharing and stale-while-revalidate
//! - Story generation and deletion, reconciled with the cache
//! - A playback manager owning at most one live audio session
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use story_core::{NullAudioBackend, SortOrder, StoryClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let audio = Arc::new(NullAudioBackend::new(Duration::from_secs(5)));
//!     let client = StoryClient::from_env(audio)?;
//!
//!     for story in client.list_stories(SortOrder::Newest).await? {
//!         println!("{} ({})", story.title, story.age_range);
//!     }
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod gateway;
pub mod id;
mod lock;
pub mod mutation;
pub mod playback;
pub mod testing;

// Primary public API
pub use cache::{CacheKey, Invalidate, QueryState, StoryCache};
pub use client::{StoryClient, LATEST_STORIES};
pub use config::CacheConfig;
pub use error::{PlaybackError, PlaybackResult, StoryError};
pub use gateway::StoryGateway;
pub use id::SessionId;
pub use mutation::{MutationCoordinator, MutationState, MutationTracker};
pub use playback::{
    AppState, AudioBackend, AudioMode, NullAudioBackend, PlaybackManager, PlaybackState,
    PlaybackTrigger, ScreenPlayback, SoundEvent, SoundEventSink, SoundHandle,
};
pub use testing::{MockAudioBackend, MockGateway};

pub use story_api::{Audio, Illustration, SortOrder, Story, StoryInput, AGE_RANGES};
