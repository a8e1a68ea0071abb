//! Story records as exchanged with the story service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Age ranges the service knows how to write for.
pub const AGE_RANGES: [&str; 3] = ["3-5 years", "6-8 years", "9-12 years"];

/// A generated story.
///
/// Stories are never edited in place once fetched; a changed story replaces
/// the cached one wholesale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Story {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub content: String,
    pub age_range: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default)]
    pub characters: Vec<String>,
    #[serde(default, alias = "settings")]
    pub setting: String,
    pub created_at: DateTime<Utc>,
    /// Ordered illustrations; the first one is the cover.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub illustrations: Vec<Illustration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<Audio>,
}

impl Story {
    /// URL of the cover illustration, if the story has a usable one.
    pub fn cover_url(&self) -> Option<&str> {
        self.illustrations
            .first()
            .map(|i| i.url.as_str())
            .filter(|url| !url.is_empty())
    }

    /// URL of the narrated audio, if the story has a usable one.
    pub fn audio_url(&self) -> Option<&str> {
        self.audio
            .as_ref()
            .and_then(|a| a.url.as_deref())
            .filter(|url| !url.is_empty())
    }

    /// Attach a freshly generated cover in front of any existing illustrations.
    ///
    /// A cover already present (same id, or same URL) is not duplicated.
    pub fn with_cover(mut self, cover: Illustration) -> Self {
        let duplicate = self.illustrations.iter().any(|existing| {
            (existing.id.is_some() && existing.id == cover.id) || existing.url == cover.url
        });
        if !duplicate {
            self.illustrations.insert(0, cover);
        }
        self
    }
}

/// An illustration belonging to a story.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Illustration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub url: String,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default)]
    pub sequence: u32,
    pub story_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

/// Narrated audio for a story.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Audio {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub s3_key: String,
    pub story_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<Illustration>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<Vec<Illustration>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Payload used to request a new story.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoryInput {
    pub title: String,
    pub age_range: String,
    pub characters: Vec<String>,
    pub setting: String,
}

/// Why a [`StoryInput`] cannot be submitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputProblem {
    MissingTitle,
    MissingSetting,
    UnknownAgeRange(String),
}

impl fmt::Display for InputProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputProblem::MissingTitle => write!(f, "story title is required"),
            InputProblem::MissingSetting => write!(f, "story setting is required"),
            InputProblem::UnknownAgeRange(range) => {
                write!(f, "unknown age range '{range}' (expected one of {AGE_RANGES:?})")
            }
        }
    }
}

impl std::error::Error for InputProblem {}

impl StoryInput {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn with_age_range(mut self, age_range: impl Into<String>) -> Self {
        self.age_range = age_range.into();
        self
    }

    pub fn with_setting(mut self, setting: impl Into<String>) -> Self {
        self.setting = setting.into();
        self
    }

    pub fn with_character(mut self, name: impl AsRef<str>) -> Self {
        self.add_character(name);
        self
    }

    /// Add a character by name. Blank names are ignored.
    pub fn add_character(&mut self, name: impl AsRef<str>) -> bool {
        let name = name.as_ref().trim();
        if name.is_empty() {
            return false;
        }
        self.characters.push(name.to_string());
        true
    }

    /// Remove the character at `index`, if there is one.
    pub fn remove_character(&mut self, index: usize) -> Option<String> {
        (index < self.characters.len()).then(|| self.characters.remove(index))
    }

    /// Check the payload before sending it.
    pub fn validate(&self) -> Result<(), InputProblem> {
        if self.title.trim().is_empty() {
            return Err(InputProblem::MissingTitle);
        }
        if self.setting.trim().is_empty() {
            return Err(InputProblem::MissingSetting);
        }
        if !AGE_RANGES.contains(&self.age_range.as_str()) {
            return Err(InputProblem::UnknownAgeRange(self.age_range.clone()));
        }
        Ok(())
    }
}

/// The two orderings of the story collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Newest,
    Oldest,
}

impl SortOrder {
    pub const ALL: [SortOrder; 2] = [SortOrder::Newest, SortOrder::Oldest];

    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Newest => "newest",
            SortOrder::Oldest => "oldest",
        }
    }

    /// Stable sort by creation time. Ties keep the order the server sent.
    pub fn sort(&self, stories: &mut [Story]) {
        match self {
            SortOrder::Newest => stories.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
            SortOrder::Oldest => stories.sort_by(|a, b| a.created_at.cmp(&b.created_at)),
        }
    }
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
