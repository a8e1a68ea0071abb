//! Client-side story cache.
//!
//! Two kinds of keys live here:
//! - `("stories", sort_order)`: the whole collection in one order
//! - `("story", id)`: a single story
//!
//! Both collections are sorted views of the same set. Every write path keeps
//! their membership identical; only the order differs.

mod query;

pub use query::QueryState;

use crate::config::CacheConfig;
use crate::error::StoryError;
use crate::gateway::StoryGateway;
use query::QueryCache;
use std::fmt;
use std::sync::Arc;
use story_api::{SortOrder, Story};
use tracing::info;

/// A key in the story cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    Stories(SortOrder),
    Story(String),
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheKey::Stories(order) => write!(f, "(\"stories\", {order})"),
            CacheKey::Story(id) => write!(f, "(\"story\", {id})"),
        }
    }
}

/// Which cache entries an invalidation applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invalidate {
    /// One sorted collection.
    Stories(SortOrder),
    /// Every sorted collection.
    AllStories,
    /// One single-story entry.
    Story(String),
    /// Every single-story entry.
    EveryStory,
    Everything,
}

impl Invalidate {
    pub fn matches(&self, key: &CacheKey) -> bool {
        match (self, key) {
            (Invalidate::Everything, _) => true,
            (Invalidate::AllStories, CacheKey::Stories(_)) => true,
            (Invalidate::Stories(wanted), CacheKey::Stories(order)) => wanted == order,
            (Invalidate::EveryStory, CacheKey::Story(_)) => true,
            (Invalidate::Story(wanted), CacheKey::Story(id)) => wanted == id,
            _ => false,
        }
    }
}

impl From<CacheKey> for Invalidate {
    fn from(key: CacheKey) -> Self {
        match key {
            CacheKey::Stories(order) => Invalidate::Stories(order),
            CacheKey::Story(id) => Invalidate::Story(id),
        }
    }
}

/// In-memory story cache in front of a [`StoryGateway`].
///
/// Created once per application and shared by cloning.
#[derive(Clone)]
pub struct StoryCache {
    gateway: Arc<dyn StoryGateway>,
    collections: QueryCache<SortOrder, Vec<Story>>,
    stories: QueryCache<String, Story>,
}

impl StoryCache {
    pub fn new(gateway: Arc<dyn StoryGateway>, config: &CacheConfig) -> Self {
        Self {
            gateway,
            collections: QueryCache::new("stories", config.stale_time),
            stories: QueryCache::new("story", config.stale_time),
        }
    }

    /// The collection in `order`, from cache or from the gateway.
    ///
    /// Concurrent calls for the same order share one gateway request.
    pub async fn fetch(&self, order: SortOrder) -> Result<Vec<Story>, StoryError> {
        let gateway = Arc::clone(&self.gateway);
        self.collections
            .fetch(order, move || async move {
                let mut stories = gateway.list_stories().await?;
                order.sort(&mut stories);
                Ok::<_, StoryError>(stories)
            })
            .await
    }

    /// A single story, from cache or from the gateway.
    pub async fn fetch_story(&self, id: &str) -> Result<Story, StoryError> {
        let gateway = Arc::clone(&self.gateway);
        let owned = id.to_string();
        self.stories
            .fetch(id.to_string(), move || async move {
                Ok::<_, StoryError>(gateway.get_story(&owned).await?)
            })
            .await
    }

    /// Replace the collection in `order` with `updater(previous)`.
    ///
    /// An absent collection is passed in as empty. No request is made.
    pub fn write(&self, order: SortOrder, updater: impl FnOnce(Vec<Story>) -> Vec<Story>) {
        self.collections
            .write(order, |previous| updater(previous.unwrap_or_default()));
    }

    /// Apply `updater` to the collection in `order` if it holds a value.
    ///
    /// A collection with nothing cached (never fetched, failed, or still
    /// loading) is marked stale instead, and any pending request for it is
    /// superseded, so its next fetch sees the change on the server. Returns
    /// whether the update was applied.
    pub fn update(
        &self,
        order: SortOrder,
        updater: impl FnOnce(Vec<Story>) -> Vec<Story>,
    ) -> bool {
        if self.collections.update_if_present(&order, updater) {
            return true;
        }
        self.collections.invalidate(|cached| *cached == order);
        false
    }

    /// Seed or replace a single-story entry.
    pub fn put_story(&self, story: Story) {
        self.stories.write(story.id.clone(), |_| story);
    }

    /// Mark entries stale so the next fetch goes to the gateway.
    pub fn invalidate(&self, target: impl Into<Invalidate>) -> usize {
        let target = target.into();
        let marked = self
            .collections
            .invalidate(|order| target.matches(&CacheKey::Stories(*order)))
            + self
                .stories
                .invalidate(|id| target.matches(&CacheKey::Story(id.clone())));
        info!(?target, marked, "cache invalidated");
        marked
    }

    /// The cached collection in `order`, without fetching.
    pub fn peek(&self, order: SortOrder) -> Option<Vec<Story>> {
        self.collections.peek(&order)
    }

    pub fn peek_story(&self, id: &str) -> Option<Story> {
        self.stories.peek(&id.to_string())
    }

    pub fn state(&self, order: SortOrder) -> QueryState<Vec<Story>> {
        self.collections.state(&order)
    }

    pub fn story_state(&self, id: &str) -> QueryState<Story> {
        self.stories.state(&id.to_string())
    }
}
