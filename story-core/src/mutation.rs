//! Story creation and deletion, reconciled with the cache.

use crate::cache::{Invalidate, StoryCache};
use crate::error::StoryError;
use crate::gateway::StoryGateway;
use std::sync::Arc;
use story_api::{SortOrder, Story, StoryInput};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Progress of one tracked mutation, as a screen observes it.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum MutationState<T> {
    #[default]
    Idle,
    Pending,
    Success(T),
    Error(StoryError),
}

impl<T> MutationState<T> {
    pub fn is_pending(&self) -> bool {
        matches!(self, MutationState::Pending)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, MutationState::Success(_))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, MutationState::Error(_))
    }

    pub fn error(&self) -> Option<&StoryError> {
        match self {
            MutationState::Error(err) => Some(err),
            _ => None,
        }
    }
}

/// Publishes the state of one logical action (e.g. "generate").
///
/// Tracking only reports; it does not serialize callers. A screen is expected
/// to disable its control while the state is pending.
pub struct MutationTracker<T> {
    state: watch::Sender<MutationState<T>>,
}

impl<T: Clone> MutationTracker<T> {
    pub fn new() -> Self {
        Self {
            state: watch::Sender::new(MutationState::Idle),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<MutationState<T>> {
        self.state.subscribe()
    }

    pub fn current(&self) -> MutationState<T> {
        self.state.borrow().clone()
    }

    /// Run `operation`, publishing pending and then its outcome.
    pub async fn track<F>(&self, operation: F) -> Result<T, StoryError>
    where
        F: std::future::Future<Output = Result<T, StoryError>>,
    {
        self.state.send_replace(MutationState::Pending);
        let result = operation.await;
        self.state.send_replace(match &result {
            Ok(value) => MutationState::Success(value.clone()),
            Err(err) => MutationState::Error(err.clone()),
        });
        result
    }

    pub fn reset(&self) {
        self.state.send_replace(MutationState::Idle);
    }
}

impl<T: Clone> Default for MutationTracker<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Sequences remote mutations and then brings the cache in line.
#[derive(Clone)]
pub struct MutationCoordinator {
    gateway: Arc<dyn StoryGateway>,
    cache: StoryCache,
}

impl MutationCoordinator {
    pub fn new(gateway: Arc<dyn StoryGateway>, cache: StoryCache) -> Self {
        Self { gateway, cache }
    }

    /// Generate a story, add its cover, and insert it into both collections.
    ///
    /// The story goes to the front of `newest` and the back of `oldest`, for
    /// each collection that is cached; one that is not is refetched on its
    /// next read. If either remote call fails the cache is left untouched. A
    /// story created whose cover then fails stays on the server; nothing here
    /// removes it.
    pub async fn generate(&self, input: StoryInput) -> Result<Story, StoryError> {
        input.validate()?;

        let story = self.gateway.generate_story(&input).await?;
        info!(story_id = %story.id, title = %story.title, "story generated");

        let cover = match self.gateway.generate_cover(&story.id).await {
            Ok(cover) => cover,
            Err(err) => {
                warn!(
                    story_id = %story.id,
                    error = %err,
                    "cover generation failed; story exists on the server without a cover"
                );
                return Err(err.into());
            }
        };
        let story = story.with_cover(cover);

        // Collections not cached yet are left to the next fetch, which
        // already includes the new story.
        let newest = self.cache.update(SortOrder::Newest, |mut stories| {
            stories.insert(0, story.clone());
            stories
        });
        let oldest = self.cache.update(SortOrder::Oldest, |mut stories| {
            stories.push(story.clone());
            stories
        });
        debug!(story_id = %story.id, newest, oldest, "generated story inserted into cache");
        self.cache.put_story(story.clone());

        Ok(story)
    }

    /// Delete a story and invalidate everything that could still show it.
    pub async fn remove(&self, id: &str) -> Result<(), StoryError> {
        self.gateway.delete_story(id).await?;
        info!(story_id = %id, "story deleted");

        self.cache.invalidate(Invalidate::AllStories);
        self.cache.invalidate(Invalidate::Story(id.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::testing::{sample_input, sample_story, MockGateway};

    fn setup(stories: Vec<Story>) -> (Arc<MockGateway>, StoryCache, MutationCoordinator) {
        let gateway = Arc::new(MockGateway::with_stories(stories));
        let cache = StoryCache::new(gateway.clone(), &CacheConfig::default());
        let coordinator = MutationCoordinator::new(gateway.clone(), cache.clone());
        (gateway, cache, coordinator)
    }

    #[tokio::test]
    async fn test_invalid_input_never_reaches_gateway() {
        let (gateway, _cache, coordinator) = setup(Vec::new());
        let err = coordinator
            .generate(StoryInput::new("No setting").with_age_range("6-8 years"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoryError::Precondition(_)));
        assert_eq!(gateway.generate_calls(), 0);
    }

    #[tokio::test]
    async fn test_cover_failure_leaves_cache_untouched() {
        let (gateway, cache, coordinator) = setup(vec![sample_story("old", 1)]);
        cache.fetch(SortOrder::Newest).await.unwrap();
        cache.fetch(SortOrder::Oldest).await.unwrap();

        gateway.fail_next_cover(story_api::Error::Api {
            status: 500,
            message: "illustrator down".into(),
        });
        let err = coordinator.generate(sample_input()).await.unwrap_err();

        assert!(matches!(err, StoryError::Rejected { status: 500, .. }));
        // The story itself was created server-side.
        assert_eq!(gateway.generate_calls(), 1);
        assert_eq!(cache.peek(SortOrder::Newest).unwrap().len(), 1);
        assert_eq!(cache.peek(SortOrder::Oldest).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_delete_keeps_cache() {
        let (gateway, cache, coordinator) = setup(vec![sample_story("s1", 1)]);
        cache.fetch(SortOrder::Newest).await.unwrap();

        gateway.fail_next_delete(story_api::Error::Network("offline".into()));
        let err = coordinator.remove("s1").await.unwrap_err();
        assert!(matches!(err, StoryError::Transport(_)));

        cache.fetch(SortOrder::Newest).await.unwrap();
        assert_eq!(gateway.list_calls(), 1);
    }

    #[tokio::test]
    async fn test_tracker_reports_outcome() {
        let tracker = MutationTracker::<u32>::new();
        let mut updates = tracker.subscribe();
        assert_eq!(tracker.current(), MutationState::Idle);

        let result = tracker.track(async { Ok(5) }).await;
        assert_eq!(result, Ok(5));
        assert!(updates.has_changed().unwrap());
        assert_eq!(*updates.borrow_and_update(), MutationState::Success(5));

        let result = tracker
            .track(async { Err(StoryError::Transport("down".into())) })
            .await;
        assert!(result.is_err());
        assert!(tracker.current().is_error());
        assert_eq!(
            tracker.current().error(),
            Some(&StoryError::Transport("down".into()))
        );

        tracker.reset();
        assert!(!tracker.current().is_pending());
    }
}
