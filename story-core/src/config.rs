//! Cache configuration.

use crate::error::StoryError;
use std::time::Duration;

/// Default time a fetched collection is served without revalidation.
pub const DEFAULT_STALE_TIME: Duration = Duration::from_secs(60);

/// Configuration for the story cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// How long an entry counts as fresh. Older entries are still served,
    /// but trigger a background refresh.
    pub stale_time: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            stale_time: DEFAULT_STALE_TIME,
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read `STORY_CACHE_STALE_SECS`, loading `.env` first.
    pub fn from_env() -> Result<Self, StoryError> {
        dotenvy::dotenv().ok();

        match std::env::var("STORY_CACHE_STALE_SECS") {
            Ok(secs) => {
                let secs: u64 = secs.parse().map_err(|_| {
                    StoryError::Config(format!("STORY_CACHE_STALE_SECS is not a number: {secs}"))
                })?;
                Ok(Self::default().with_stale_time(Duration::from_secs(secs)))
            }
            Err(_) => Ok(Self::default()),
        }
    }

    pub fn with_stale_time(mut self, stale_time: Duration) -> Self {
        self.stale_time = stale_time;
        self
    }
}
