//! StoryClient - the entry point screens talk to.
//!
//! This wraps the cache, the mutation coordinator and the playback manager
//! behind the narrow set of calls the screens need.

use crate::cache::{QueryState, StoryCache};
use crate::config::CacheConfig;
use crate::error::{PlaybackResult, Result};
use crate::gateway::StoryGateway;
use crate::id::SessionId;
use crate::mutation::{MutationCoordinator, MutationState, MutationTracker};
use crate::playback::{AudioBackend, PlaybackManager, PlaybackState, ScreenPlayback};
use std::sync::Arc;
use story_api::{SortOrder, Story, StoryApi, StoryInput};
use tokio::sync::watch;

/// Number of stories the home screen shows.
pub const LATEST_STORIES: usize = 4;

struct Trackers {
    generate: MutationTracker<Story>,
    delete: MutationTracker<()>,
}

/// Application-wide story client.
///
/// Create one at startup and clone it into every screen; clones share the
/// cache, the mutation state and the playback session.
#[derive(Clone)]
pub struct StoryClient {
    cache: StoryCache,
    mutations: MutationCoordinator,
    playback: PlaybackManager,
    trackers: Arc<Trackers>,
}

impl StoryClient {
    pub fn new(
        gateway: Arc<dyn StoryGateway>,
        audio: Arc<dyn AudioBackend>,
        config: CacheConfig,
    ) -> Self {
        let cache = StoryCache::new(Arc::clone(&gateway), &config);
        Self {
            mutations: MutationCoordinator::new(gateway, cache.clone()),
            cache,
            playback: PlaybackManager::new(audio),
            trackers: Arc::new(Trackers {
                generate: MutationTracker::new(),
                delete: MutationTracker::new(),
            }),
        }
    }

    /// Client talking to the service configured in the environment.
    pub fn from_env(audio: Arc<dyn AudioBackend>) -> Result<Self> {
        let api = StoryApi::from_env()?;
        Ok(Self::new(Arc::new(api), audio, CacheConfig::from_env()?))
    }

    pub fn cache(&self) -> &StoryCache {
        &self.cache
    }

    pub fn playback(&self) -> &PlaybackManager {
        &self.playback
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub async fn list_stories(&self, order: SortOrder) -> Result<Vec<Story>> {
        self.cache.fetch(order).await
    }

    pub fn stories_state(&self, order: SortOrder) -> QueryState<Vec<Story>> {
        self.cache.state(order)
    }

    /// The first `count` stories, newest first.
    pub async fn latest_stories(&self, count: usize) -> Result<Vec<Story>> {
        let mut stories = self.cache.fetch(SortOrder::Newest).await?;
        stories.truncate(count);
        Ok(stories)
    }

    pub async fn get_story(&self, id: &str) -> Result<Story> {
        self.cache.fetch_story(id).await
    }

    pub fn story_state(&self, id: &str) -> QueryState<Story> {
        self.cache.story_state(id)
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    pub async fn generate_story(&self, input: StoryInput) -> Result<Story> {
        self.trackers
            .generate
            .track(self.mutations.generate(input))
            .await
    }

    pub fn generation_status(&self) -> watch::Receiver<MutationState<Story>> {
        self.trackers.generate.subscribe()
    }

    pub async fn delete_story(&self, id: &str) -> Result<()> {
        self.trackers.delete.track(self.mutations.remove(id)).await
    }

    pub fn deletion_status(&self) -> watch::Receiver<MutationState<()>> {
        self.trackers.delete.subscribe()
    }

    // =========================================================================
    // Playback
    // =========================================================================

    pub async fn play_audio(&self, story: &Story) -> PlaybackResult<SessionId> {
        self.playback.play(story).await
    }

    pub async fn stop_audio(&self) -> bool {
        self.playback.stop().await
    }

    pub fn playback_status(&self) -> watch::Receiver<PlaybackState> {
        self.playback.subscribe()
    }

    /// Bind a reading screen showing `story` to the playback session.
    pub fn screen_playback(&self, story: Story) -> ScreenPlayback {
        ScreenPlayback::new(self.playback.clone(), story)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{sample_input, sample_story, MockAudioBackend, MockGateway};

    fn client(stories: Vec<Story>) -> (Arc<MockGateway>, StoryClient) {
        let gateway = Arc::new(MockGateway::with_stories(stories));
        let client = StoryClient::new(
            gateway.clone(),
            Arc::new(MockAudioBackend::new()),
            CacheConfig::default(),
        );
        (gateway, client)
    }

    #[tokio::test]
    async fn test_latest_stories() {
        let stories = (0..6).map(|i| sample_story(&format!("old{i}"), i)).collect();
        let (_gateway, client) = client(stories);

        let latest = client.latest_stories(LATEST_STORIES).await.unwrap();
        let ids: Vec<_> = latest.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, ["old5", "old4", "old3", "old2"]);
    }

    #[tokio::test]
    async fn test_generation_status_follows_mutation() {
        let (gateway, client) = client(Vec::new());
        let status = client.generation_status();

        client.generate_story(sample_input()).await.unwrap();
        assert!(status.borrow().is_success());

        gateway.fail_next_generate(story_api::Error::Network("offline".into()));
        assert!(client.generate_story(sample_input()).await.is_err());
        assert!(status.borrow().is_error());
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let (gateway, client) = client(vec![sample_story("a", 1)]);
        let other = client.clone();

        client.list_stories(SortOrder::Newest).await.unwrap();
        other.list_stories(SortOrder::Newest).await.unwrap();
        assert_eq!(gateway.list_calls(), 1);
        assert!(other.stories_state(SortOrder::Newest).data.is_some());
    }
}
