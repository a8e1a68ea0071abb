//! Minimal client for the story generation service.
//!
//! This crate provides:
//! - The story data model shared with the server
//! - A typed client for the list/get/generate/cover/create/delete endpoints
//! - Transport errors that can be cloned and shared between waiters

pub mod model;

pub use model::{Audio, Illustration, InputProblem, SortOrder, Story, StoryInput, AGE_RANGES};

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use serde::de::DeserializeOwned;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

const DEFAULT_BASE_URL: &str = "http://localhost:8888";
const DEFAULT_TIMEOUT_SECS: u64 = 120;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Errors that can occur when talking to the story service.
#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// True when the request never got a response from the server.
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Network(_))
    }
}

/// Connection settings for [`StoryApi`].
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Base URL of the service, without a trailing slash.
    pub base_url: String,
    /// Total time allowed for one request. Story generation is slow.
    pub timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
        }
    }
}

impl ApiConfig {
    /// Read `STORY_API_URL` and `STORY_API_TIMEOUT_SECS`, loading `.env` first.
    pub fn from_env() -> Result<Self, Error> {
        dotenvy::dotenv().ok();

        let mut config = Self::default();
        if let Ok(url) = std::env::var("STORY_API_URL") {
            config = config.with_base_url(url);
        }
        if let Ok(secs) = std::env::var("STORY_API_TIMEOUT_SECS") {
            let secs: u64 = secs
                .parse()
                .map_err(|_| Error::Config(format!("STORY_API_TIMEOUT_SECS is not a number: {secs}")))?;
            config = config.with_timeout(Duration::from_secs(secs));
        }
        Ok(config)
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

/// Story service client.
#[derive(Clone)]
pub struct StoryApi {
    client: reqwest::Client,
    base_url: String,
}

impl StoryApi {
    /// Create a client with the given configuration.
    pub fn new(config: ApiConfig) -> Result<Self, Error> {
        if !(config.base_url.starts_with("http://") || config.base_url.starts_with("https://")) {
            return Err(Error::Config(format!(
                "base URL must be http(s): {}",
                config.base_url
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .default_headers(Self::default_headers())
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url,
        })
    }

    /// Create a client from the environment. See [`ApiConfig::from_env`].
    pub fn from_env() -> Result<Self, Error> {
        Self::new(ApiConfig::from_env()?)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `GET /stories`
    pub async fn list_stories(&self) -> Result<Vec<Story>, Error> {
        self.send(self.client.get(self.url("/stories"))).await
    }

    /// `GET /stories/{id}`
    pub async fn get_story(&self, id: &str) -> Result<Story, Error> {
        self.send(self.client.get(self.url(&format!("/stories/{id}"))))
            .await
    }

    /// `POST /stories/generate-story`
    ///
    /// The returned story has no cover yet; see [`StoryApi::generate_cover`].
    pub async fn generate_story(&self, input: &StoryInput) -> Result<Story, Error> {
        self.send(
            self.client
                .post(self.url("/stories/generate-story"))
                .json(input),
        )
        .await
    }

    /// `POST /illustrations/cover/{id}`
    pub async fn generate_cover(&self, story_id: &str) -> Result<Illustration, Error> {
        self.send(
            self.client
                .post(self.url(&format!("/illustrations/cover/{story_id}"))),
        )
        .await
    }

    /// `POST /stories` - store a story record without generating any text.
    pub async fn create_story(&self, input: &StoryInput) -> Result<Story, Error> {
        self.send(self.client.post(self.url("/stories")).json(input))
            .await
    }

    /// `DELETE /stories/{id}`
    pub async fn delete_story(&self, id: &str) -> Result<(), Error> {
        // The body, if any, carries nothing we use.
        self.execute(self.client.delete(self.url(&format!("/stories/{id}"))))
            .await?;
        Ok(())
    }

    fn default_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn execute(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, Error> {
        let response = request
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        let status = response.status();
        debug!(status = status.as_u16(), url = %response.url(), "story service responded");

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        Ok(response)
    }

    async fn send<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> Result<T, Error> {
        let response = self.execute(request).await?;
        let body = response
            .bytes()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;
        serde_json::from_slice(&body).map_err(|e| Error::Parse(e.to_string()))
    }
}
