//! The remote story service as seen by the core.

use async_trait::async_trait;
use story_api::{Illustration, Story, StoryApi, StoryInput};

/// Remote source of truth for stories.
///
/// Implemented by [`StoryApi`] in production and by
/// [`MockGateway`](crate::testing::MockGateway) in tests.
#[async_trait]
pub trait StoryGateway: Send + Sync {
    /// List every story, in whatever order the service returns them.
    async fn list_stories(&self) -> Result<Vec<Story>, story_api::Error>;

    async fn get_story(&self, id: &str) -> Result<Story, story_api::Error>;

    /// Generate a story. The result carries no cover.
    async fn generate_story(&self, input: &StoryInput) -> Result<Story, story_api::Error>;

    /// Generate the cover illustration for an existing story.
    async fn generate_cover(&self, story_id: &str) -> Result<Illustration, story_api::Error>;

    async fn delete_story(&self, id: &str) -> Result<(), story_api::Error>;
}

#[async_trait]
impl StoryGateway for StoryApi {
    async fn list_stories(&self) -> Result<Vec<Story>, story_api::Error> {
        StoryApi::list_stories(self).await
    }

    async fn get_story(&self, id: &str) -> Result<Story, story_api::Error> {
        StoryApi::get_story(self, id).await
    }

    async fn generate_story(&self, input: &StoryInput) -> Result<Story, story_api::Error> {
        StoryApi::generate_story(self, input).await
    }

    async fn generate_cover(&self, story_id: &str) -> Result<Illustration, story_api::Error> {
        StoryApi::generate_cover(self, story_id).await
    }

    async fn delete_story(&self, id: &str) -> Result<(), story_api::Error> {
        StoryApi::delete_story(self, id).await
    }
}
