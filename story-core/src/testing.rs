//! Testing utilities for the story core.
//!
//! This module provides:
//! - `MockGateway`, an in-memory story service with call counters and
//!   scripted failures
//! - `MockAudioBackend`, a recording audio platform
//! - Story fixtures

use crate::error::{PlaybackError, PlaybackResult};
use crate::gateway::StoryGateway;
use crate::lock::mutex_lock;
use crate::playback::{AudioBackend, AudioMode, SoundEvent, SoundEventSink, SoundHandle};
use async_trait::async_trait;
use chrono::{DateTime, Duration as Minutes, TimeZone, Utc};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use story_api::{Audio, Illustration, Story, StoryInput};

const SOURCE: &str = "testing";

fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or_default()
}

/// A story created `minute` minutes after a fixed epoch, with no media.
pub fn sample_story(id: &str, minute: i64) -> Story {
    Story {
        id: id.to_string(),
        title: format!("Story {id}"),
        content: "Once upon a time...".to_string(),
        age_range: "6-8 years".to_string(),
        author: None,
        user_id: None,
        characters: vec!["Mia".to_string()],
        setting: "a quiet moon base".to_string(),
        created_at: epoch() + Minutes::minutes(minute),
        illustrations: Vec::new(),
        audio: None,
    }
}

/// Like [`sample_story`], with narrated audio.
pub fn story_with_audio(id: &str, minute: i64) -> Story {
    let mut story = sample_story(id, minute);
    story.audio = Some(Audio {
        id: Some(format!("audio-{id}")),
        url: Some(format!("https://audio.example/{id}.mp3")),
        s3_key: format!("audio/{id}.mp3"),
        story_id: id.to_string(),
        created_at: None,
    });
    story
}

/// The generate-form payload used throughout the tests.
pub fn sample_input() -> StoryInput {
    StoryInput::new("Moon Trip")
        .with_age_range("6-8 years")
        .with_character("Mia")
        .with_setting("a quiet moon base")
}

#[derive(Default)]
struct ScriptedFailures {
    list: Option<story_api::Error>,
    get: Option<story_api::Error>,
    generate: Option<story_api::Error>,
    cover: Option<story_api::Error>,
    delete: Option<story_api::Error>,
}

/// An in-memory story service.
///
/// Generated stories get ids `s1`, `s2`, ... and a creation time one minute
/// after the newest story on the server.
pub struct MockGateway {
    stories: Mutex<Vec<Story>>,
    failures: Mutex<ScriptedFailures>,
    latency: Option<Duration>,
    next_id: AtomicUsize,
    list_calls: AtomicUsize,
    get_calls: AtomicUsize,
    generate_calls: AtomicUsize,
    cover_calls: AtomicUsize,
    delete_calls: AtomicUsize,
}

impl Default for MockGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl MockGateway {
    pub fn new() -> Self {
        Self::with_stories(Vec::new())
    }

    /// A service already holding `stories`, returned in this order by `list`.
    pub fn with_stories(stories: Vec<Story>) -> Self {
        Self {
            stories: Mutex::new(stories),
            failures: Mutex::new(ScriptedFailures::default()),
            latency: None,
            next_id: AtomicUsize::new(1),
            list_calls: AtomicUsize::new(0),
            get_calls: AtomicUsize::new(0),
            generate_calls: AtomicUsize::new(0),
            cover_calls: AtomicUsize::new(0),
            delete_calls: AtomicUsize::new(0),
        }
    }

    /// Delay every call by `latency` (tokio time, so it can be paused).
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn fail_next_list(&self, err: story_api::Error) {
        self.failures().list = Some(err);
    }

    pub fn fail_next_get(&self, err: story_api::Error) {
        self.failures().get = Some(err);
    }

    pub fn fail_next_generate(&self, err: story_api::Error) {
        self.failures().generate = Some(err);
    }

    pub fn fail_next_cover(&self, err: story_api::Error) {
        self.failures().cover = Some(err);
    }

    pub fn fail_next_delete(&self, err: story_api::Error) {
        self.failures().delete = Some(err);
    }

    /// Add a story directly on the "server", bypassing any client.
    pub fn insert(&self, story: Story) {
        mutex_lock(&self.stories, SOURCE, "insert").push(story);
    }

    /// Ids currently stored on the "server", in storage order.
    pub fn story_ids(&self) -> Vec<String> {
        mutex_lock(&self.stories, SOURCE, "story_ids")
            .iter()
            .map(|s| s.id.clone())
            .collect()
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    pub fn generate_calls(&self) -> usize {
        self.generate_calls.load(Ordering::SeqCst)
    }

    pub fn cover_calls(&self) -> usize {
        self.cover_calls.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }

    fn failures(&self) -> std::sync::MutexGuard<'_, ScriptedFailures> {
        mutex_lock(&self.failures, SOURCE, "failures")
    }

    async fn respond(&self) {
        match self.latency {
            Some(latency) => tokio::time::sleep(latency).await,
            // Always suspend once so concurrent callers really overlap.
            None => tokio::task::yield_now().await,
        }
    }

    fn not_found(id: &str) -> story_api::Error {
        story_api::Error::Api {
            status: 404,
            message: format!("story {id} not found"),
        }
    }
}

#[async_trait]
impl StoryGateway for MockGateway {
    async fn list_stories(&self) -> Result<Vec<Story>, story_api::Error> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.respond().await;
        if let Some(err) = self.failures().list.take() {
            return Err(err);
        }
        Ok(mutex_lock(&self.stories, SOURCE, "list").clone())
    }

    async fn get_story(&self, id: &str) -> Result<Story, story_api::Error> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        self.respond().await;
        if let Some(err) = self.failures().get.take() {
            return Err(err);
        }
        mutex_lock(&self.stories, SOURCE, "get")
            .iter()
            .find(|s| s.id == id)
            .cloned()
            .ok_or_else(|| Self::not_found(id))
    }

    async fn generate_story(&self, input: &StoryInput) -> Result<Story, story_api::Error> {
        self.generate_calls.fetch_add(1, Ordering::SeqCst);
        self.respond().await;
        if let Some(err) = self.failures().generate.take() {
            return Err(err);
        }

        let id = format!("s{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let mut stories = mutex_lock(&self.stories, SOURCE, "generate");
        let created_at = stories
            .iter()
            .map(|s| s.created_at)
            .max()
            .map_or_else(epoch, |latest| latest + Minutes::minutes(1));

        let mut story = story_with_audio(&id, 0);
        story.title = input.title.clone();
        story.age_range = input.age_range.clone();
        story.characters = input.characters.clone();
        story.setting = input.setting.clone();
        story.content = format!(
            "{} went on an adventure in {}.",
            input.characters.join(" and "),
            input.setting
        );
        story.created_at = created_at;

        stories.push(story.clone());
        Ok(story)
    }

    async fn generate_cover(&self, story_id: &str) -> Result<Illustration, story_api::Error> {
        self.cover_calls.fetch_add(1, Ordering::SeqCst);
        self.respond().await;
        if let Some(err) = self.failures().cover.take() {
            return Err(err);
        }

        let mut stories = mutex_lock(&self.stories, SOURCE, "cover");
        let story = stories
            .iter_mut()
            .find(|s| s.id == story_id)
            .ok_or_else(|| Self::not_found(story_id))?;
        let cover = Illustration {
            id: Some(format!("cover-{story_id}")),
            url: format!("https://img.example/{story_id}/cover.png"),
            kind: Some("cover".to_string()),
            sequence: 0,
            story_id: story_id.to_string(),
            created_at: None,
        };
        story.illustrations.insert(0, cover.clone());
        Ok(cover)
    }

    async fn delete_story(&self, id: &str) -> Result<(), story_api::Error> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        self.respond().await;
        if let Some(err) = self.failures().delete.take() {
            return Err(err);
        }

        let mut stories = mutex_lock(&self.stories, SOURCE, "delete");
        let before = stories.len();
        stories.retain(|s| s.id != id);
        if stories.len() == before {
            return Err(Self::not_found(id));
        }
        Ok(())
    }
}

struct SoundRecord {
    url: String,
    played: bool,
    stopped: bool,
    unloads: usize,
    events: SoundEventSink,
}

impl SoundRecord {
    fn is_unloaded(&self) -> bool {
        self.unloads > 0
    }

    fn is_playing(&self) -> bool {
        self.played && !self.stopped && !self.is_unloaded()
    }
}

#[derive(Default)]
struct AudioLog {
    sounds: Vec<SoundRecord>,
    peak_playing: usize,
}

/// A recording audio platform.
pub struct MockAudioBackend {
    log: Arc<Mutex<AudioLog>>,
    permission: AtomicBool,
    permission_requests: AtomicUsize,
    mode: Mutex<Option<AudioMode>>,
    fail_create: Mutex<Option<PlaybackError>>,
    fail_play: Arc<Mutex<Option<PlaybackError>>>,
    latency: Option<Duration>,
}

impl Default for MockAudioBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockAudioBackend {
    pub fn new() -> Self {
        Self {
            log: Arc::new(Mutex::new(AudioLog::default())),
            permission: AtomicBool::new(true),
            permission_requests: AtomicUsize::new(0),
            mode: Mutex::new(None),
            fail_create: Mutex::new(None),
            fail_play: Arc::new(Mutex::new(None)),
            latency: None,
        }
    }

    /// Delay permission requests, sound creation and the start of playback
    /// by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn deny_permission(&self) {
        self.permission.store(false, Ordering::SeqCst);
    }

    pub fn grant_permission(&self) {
        self.permission.store(true, Ordering::SeqCst);
    }

    pub fn fail_next_create(&self, err: PlaybackError) {
        *mutex_lock(&self.fail_create, SOURCE, "fail_create") = Some(err);
    }

    pub fn fail_next_play(&self, err: PlaybackError) {
        *mutex_lock(&self.fail_play, SOURCE, "fail_play") = Some(err);
    }

    pub fn permission_requests(&self) -> usize {
        self.permission_requests.load(Ordering::SeqCst)
    }

    pub fn last_mode(&self) -> Option<AudioMode> {
        *mutex_lock(&self.mode, SOURCE, "last_mode")
    }

    /// Number of sounds ever created.
    pub fn created(&self) -> usize {
        self.log().sounds.len()
    }

    /// Number of sounds created and not yet unloaded.
    pub fn loaded(&self) -> usize {
        self.log().sounds.iter().filter(|s| !s.is_unloaded()).count()
    }

    /// Total `unload` calls across all sounds; a sound released twice counts twice.
    pub fn unload_calls(&self) -> usize {
        self.log().sounds.iter().map(|s| s.unloads).sum()
    }

    /// Number of sounds currently playing.
    pub fn playing(&self) -> usize {
        self.log().sounds.iter().filter(|s| s.is_playing()).count()
    }

    /// Most sounds ever playing at the same time.
    pub fn peak_playing(&self) -> usize {
        self.log().peak_playing
    }

    /// URLs of the sounds that are playing.
    pub fn playing_urls(&self) -> Vec<String> {
        self.log()
            .sounds
            .iter()
            .filter(|s| s.is_playing())
            .map(|s| s.url.clone())
            .collect()
    }

    /// Make every playing sound reach its end.
    pub fn finish_all(&self) {
        for events in self.playing_sinks() {
            events.emit(SoundEvent::Finished);
        }
    }

    /// Make every playing sound fail.
    pub fn fail_all(&self, reason: &str) {
        for events in self.playing_sinks() {
            events.emit(SoundEvent::Failed(reason.to_string()));
        }
    }

    fn playing_sinks(&self) -> Vec<SoundEventSink> {
        // Collected first: emitting re-enters the manager, which calls back
        // into this backend.
        self.log()
            .sounds
            .iter()
            .filter(|s| s.is_playing())
            .map(|s| s.events.clone())
            .collect()
    }

    fn log(&self) -> std::sync::MutexGuard<'_, AudioLog> {
        mutex_lock(&self.log, SOURCE, "audio_log")
    }

    async fn respond(&self) {
        match self.latency {
            Some(latency) => tokio::time::sleep(latency).await,
            None => tokio::task::yield_now().await,
        }
    }
}

#[async_trait]
impl AudioBackend for MockAudioBackend {
    async fn request_permission(&self) -> PlaybackResult<bool> {
        self.permission_requests.fetch_add(1, Ordering::SeqCst);
        self.respond().await;
        Ok(self.permission.load(Ordering::SeqCst))
    }

    async fn set_audio_mode(&self, mode: AudioMode) -> PlaybackResult<()> {
        *mutex_lock(&self.mode, SOURCE, "set_mode") = Some(mode);
        Ok(())
    }

    async fn create_sound(
        &self,
        url: &str,
        events: SoundEventSink,
    ) -> PlaybackResult<Box<dyn SoundHandle>> {
        self.respond().await;
        if let Some(err) = mutex_lock(&self.fail_create, SOURCE, "create").take() {
            return Err(err);
        }

        let mut log = self.log();
        log.sounds.push(SoundRecord {
            url: url.to_string(),
            played: false,
            stopped: false,
            unloads: 0,
            events,
        });
        Ok(Box::new(MockSound {
            index: log.sounds.len() - 1,
            log: Arc::clone(&self.log),
            fail_play: Arc::clone(&self.fail_play),
            latency: self.latency,
        }))
    }
}

struct MockSound {
    index: usize,
    log: Arc<Mutex<AudioLog>>,
    fail_play: Arc<Mutex<Option<PlaybackError>>>,
    latency: Option<Duration>,
}

#[async_trait]
impl SoundHandle for MockSound {
    async fn play(&self) -> PlaybackResult<()> {
        if let Some(err) = mutex_lock(&self.fail_play, SOURCE, "play").take() {
            return Err(err);
        }
        {
            let mut log = mutex_lock(&self.log, SOURCE, "play");
            let sound = &mut log.sounds[self.index];
            if sound.is_unloaded() {
                return Err(PlaybackError::Resource("sound already unloaded".into()));
            }
            sound.played = true;
            let playing = log.sounds.iter().filter(|s| s.is_playing()).count();
            log.peak_playing = log.peak_playing.max(playing);
        }
        // Audible from here on; the platform confirms the start later.
        match self.latency {
            Some(latency) => tokio::time::sleep(latency).await,
            None => tokio::task::yield_now().await,
        }
        Ok(())
    }

    async fn stop(&self) -> PlaybackResult<()> {
        mutex_lock(&self.log, SOURCE, "stop").sounds[self.index].stopped = true;
        Ok(())
    }

    async fn unload(&self) -> PlaybackResult<()> {
        mutex_lock(&self.log, SOURCE, "unload").sounds[self.index].unloads += 1;
        Ok(())
    }
}
