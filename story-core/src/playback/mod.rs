//! Audio playback lifecycle.
//!
//! At most one sound is live at a time. Every way playback can end (a stop
//! request, a cancellation trigger, natural completion, a failure) goes
//! through the same detach-then-release path:
//!
//! 1. `detach` runs synchronously under the lock: the state becomes `Idle`
//!    and the live sound, if any, is taken out of the slot. Only one caller
//!    can ever take a given sound, so it is released exactly once.
//! 2. `release` stops and unloads the detached sound.
//!
//! A `play` that is still acquiring when a stop or another play arrives loses
//! its session; once its pending platform call resolves it sees that and
//! unloads whatever it got without ever starting it. A sound that finishes
//! or fails before the platform confirms its start still counts as played,
//! and the pending `play` reports that outcome.

mod backend;
mod screen;

pub use backend::{AudioBackend, AudioMode, NullAudioBackend, SoundEvent, SoundHandle};
pub use screen::{AppState, PlaybackTrigger, ScreenPlayback};

use crate::error::{PlaybackError, PlaybackResult};
use crate::id::SessionId;
use crate::lock::mutex_lock;
use std::sync::{Arc, Mutex, Weak};
use story_api::Story;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, info, warn};

const SOURCE: &str = "playback";

/// Where the manager is in its lifecycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum PlaybackState {
    #[default]
    Idle,
    /// Permission, mode and sound creation are in progress.
    Acquiring { story_id: String, session: SessionId },
    Playing { story_id: String, session: SessionId },
}

impl PlaybackState {
    pub fn is_idle(&self) -> bool {
        matches!(self, PlaybackState::Idle)
    }

    pub fn is_playing(&self) -> bool {
        matches!(self, PlaybackState::Playing { .. })
    }

    /// The story owning the current session, if any.
    pub fn story_id(&self) -> Option<&str> {
        match self {
            PlaybackState::Idle => None,
            PlaybackState::Acquiring { story_id, .. } | PlaybackState::Playing { story_id, .. } => {
                Some(story_id.as_str())
            }
        }
    }

    pub fn session(&self) -> Option<SessionId> {
        match self {
            PlaybackState::Idle => None,
            PlaybackState::Acquiring { session, .. } | PlaybackState::Playing { session, .. } => {
                Some(*session)
            }
        }
    }
}

struct LiveSound {
    session: SessionId,
    story_id: String,
    sound: Arc<dyn SoundHandle>,
}

/// A session taken out of the slot. Sessions still acquiring have no sound.
struct Detached(Option<LiveSound>);

impl Detached {
    async fn release(self) {
        if let Some(live) = self.0 {
            Inner::release(live).await;
        }
    }
}

#[derive(Default)]
struct Slot {
    state: PlaybackState,
    live: Option<LiveSound>,
    /// The last session ended by its own sound.
    ended: Option<(SessionId, SoundEvent)>,
}

impl Slot {
    /// How `session` ended, once it is no longer current.
    fn outcome(&self, session: SessionId) -> PlaybackResult<()> {
        match &self.ended {
            Some((ended, SoundEvent::Finished)) if *ended == session => Ok(()),
            Some((ended, SoundEvent::Failed(reason))) if *ended == session => {
                Err(PlaybackError::Resource(reason.clone()))
            }
            _ => Err(PlaybackError::Superseded(session)),
        }
    }
}

struct Inner {
    backend: Arc<dyn AudioBackend>,
    slot: Mutex<Slot>,
    published: watch::Sender<PlaybackState>,
}

impl Inner {
    /// Move to `Idle` and take the session out, if `owns` accepts the current state.
    fn detach(&self, owns: impl Fn(&PlaybackState) -> bool) -> Option<Detached> {
        let mut slot = mutex_lock(&self.slot, SOURCE, "detach");
        self.detach_locked(&mut slot, owns)
    }

    fn detach_locked(
        &self,
        slot: &mut Slot,
        owns: impl Fn(&PlaybackState) -> bool,
    ) -> Option<Detached> {
        if slot.state.is_idle() || !owns(&slot.state) {
            return None;
        }
        debug!(state = ?slot.state, "detaching playback session");
        slot.state = PlaybackState::Idle;
        self.published.send_replace(PlaybackState::Idle);
        Some(Detached(slot.live.take()))
    }

    fn is_current(&self, session: SessionId) -> bool {
        mutex_lock(&self.slot, SOURCE, "is_current").state.session() == Some(session)
    }

    async fn release(live: LiveSound) {
        if let Err(err) = live.sound.stop().await {
            warn!(session = %live.session, error = %err, "stopping sound failed, unloading anyway");
        }
        if let Err(err) = live.sound.unload().await {
            warn!(session = %live.session, error = %err, "unloading sound failed");
        }
        info!(session = %live.session, story_id = %live.story_id, "playback released");
    }

    async fn release_unclaimed(session: SessionId, sound: Box<dyn SoundHandle>) {
        debug!(%session, "unloading sound of superseded session");
        if let Err(err) = sound.unload().await {
            warn!(%session, error = %err, "unloading superseded sound failed");
        }
    }
}

/// Where a sound reports completion and failures.
///
/// Handed to [`AudioBackend::create_sound`]. Events for a session that has
/// already ended are ignored.
#[derive(Clone)]
pub struct SoundEventSink {
    session: SessionId,
    manager: Weak<Inner>,
    runtime: Option<Handle>,
}

impl SoundEventSink {
    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Report an event. May be called from any thread.
    pub fn emit(&self, event: SoundEvent) {
        let Some(inner) = self.manager.upgrade() else {
            return;
        };
        let session = self.session;
        let detached = {
            let mut slot = mutex_lock(&inner.slot, SOURCE, "emit");
            let detached =
                inner.detach_locked(&mut slot, |state| state.session() == Some(session));
            if detached.is_some() {
                slot.ended = Some((session, event.clone()));
            }
            detached
        };
        let Some(detached) = detached else {
            debug!(%session, ?event, "event for finished session ignored");
            return;
        };

        match &event {
            SoundEvent::Finished => info!(%session, "playback finished"),
            SoundEvent::Failed(reason) => warn!(%session, reason = %reason, "playback failed"),
        }
        match &self.runtime {
            Some(runtime) => {
                runtime.spawn(detached.release());
            }
            None => warn!(%session, "no runtime to release sound on, dropping handle"),
        }
    }
}

/// Owns the single live audio session.
///
/// Clones share the same session.
#[derive(Clone)]
pub struct PlaybackManager {
    inner: Arc<Inner>,
}

impl PlaybackManager {
    pub fn new(backend: Arc<dyn AudioBackend>) -> Self {
        Self {
            inner: Arc::new(Inner {
                backend,
                slot: Mutex::new(Slot::default()),
                published: watch::Sender::new(PlaybackState::Idle),
            }),
        }
    }

    pub fn state(&self) -> PlaybackState {
        mutex_lock(&self.inner.slot, SOURCE, "state").state.clone()
    }

    /// Watch state transitions.
    pub fn subscribe(&self) -> watch::Receiver<PlaybackState> {
        self.inner.published.subscribe()
    }

    pub fn is_playing(&self) -> bool {
        self.state().is_playing()
    }

    /// Start playing `story`'s audio, ending any session first.
    ///
    /// Fails with `MissingAudio` or `PermissionDenied` before any sound is
    /// created, with `Resource` if the platform fails, and with `Superseded`
    /// if a stop or another play arrived while this one was acquiring.
    /// If the sound finishes before the platform confirms its start, the
    /// call still succeeds and the manager is already back to `Idle`.
    pub async fn play(&self, story: &Story) -> PlaybackResult<SessionId> {
        self.stop().await;

        let Some(url) = story.audio_url() else {
            warn!(story_id = %story.id, "story has no audio");
            return Err(PlaybackError::MissingAudio {
                story_id: story.id.clone(),
            });
        };

        let session = SessionId::new();
        let overlapped = {
            let mut slot = mutex_lock(&self.inner.slot, SOURCE, "play");
            slot.state = PlaybackState::Acquiring {
                story_id: story.id.clone(),
                session,
            };
            self.inner.published.send_replace(slot.state.clone());
            slot.ended = None;
            // Another play may have claimed a sound while we were stopping.
            slot.live.take()
        };
        if let Some(live) = overlapped {
            Inner::release(live).await;
        }
        info!(%session, story_id = %story.id, "acquiring playback");

        match self.acquire(story, url, session).await {
            Ok(()) => Ok(session),
            Err(err) => {
                // Only the session's own failure may reset the state.
                if let Some(detached) = self.inner.detach(|state| state.session() == Some(session)) {
                    detached.release().await;
                }
                Err(err)
            }
        }
    }

    async fn acquire(&self, story: &Story, url: &str, session: SessionId) -> PlaybackResult<()> {
        let backend = &self.inner.backend;

        if !backend.request_permission().await? {
            warn!(%session, "audio permission denied");
            return Err(PlaybackError::PermissionDenied);
        }
        if !self.inner.is_current(session) {
            return Err(PlaybackError::Superseded(session));
        }

        backend.set_audio_mode(AudioMode::STORY_PLAYBACK).await?;
        if !self.inner.is_current(session) {
            return Err(PlaybackError::Superseded(session));
        }

        let events = SoundEventSink {
            session,
            manager: Arc::downgrade(&self.inner),
            runtime: Handle::try_current().ok(),
        };
        let sound = backend.create_sound(url, events).await?;

        let claimed = {
            let mut slot = mutex_lock(&self.inner.slot, SOURCE, "claim");
            if slot.state.session() == Some(session) {
                let sound: Arc<dyn SoundHandle> = Arc::from(sound);
                slot.live = Some(LiveSound {
                    session,
                    story_id: story.id.clone(),
                    sound: Arc::clone(&sound),
                });
                Ok(sound)
            } else {
                Err(sound)
            }
        };
        let sound = match claimed {
            Ok(sound) => sound,
            Err(unclaimed) => {
                Inner::release_unclaimed(session, unclaimed).await;
                return Err(PlaybackError::Superseded(session));
            }
        };

        let started = sound.play().await;

        let mut slot = mutex_lock(&self.inner.slot, SOURCE, "started");
        if slot.state.session() != Some(session) {
            // Ended while starting; whoever detached it releases it.
            return slot.outcome(session);
        }
        started?;
        slot.state = PlaybackState::Playing {
            story_id: story.id.clone(),
            session,
        };
        self.inner.published.send_replace(slot.state.clone());
        info!(%session, story_id = %story.id, "playing");
        Ok(())
    }

    /// End the current session, whoever owns it.
    ///
    /// Returns `false` if nothing was live. Safe to call any number of times.
    pub async fn stop(&self) -> bool {
        match self.inner.detach(|_| true) {
            Some(detached) => {
                detached.release().await;
                true
            }
            None => false,
        }
    }

    /// End the current session if it belongs to `story_id`.
    pub async fn cancel(&self, trigger: PlaybackTrigger, story_id: &str) -> bool {
        let owned = |state: &PlaybackState| state.story_id() == Some(story_id);
        let was_active = !self.state().is_idle();
        match self.inner.detach(owned) {
            Some(detached) => {
                info!(?trigger, story_id, "playback cancelled");
                detached.release().await;
                true
            }
            None => {
                if was_active {
                    debug!(?trigger, story_id, "cancel left another story's session alone");
                }
                false
            }
        }
    }

    /// Synchronous form of [`cancel`](Self::cancel) for contexts that cannot
    /// await. The state is reset immediately; the sound is released on the
    /// current tokio runtime, or dropped if there is none.
    pub fn cancel_now(&self, trigger: PlaybackTrigger, story_id: &str) -> bool {
        let Some(detached) = self
            .inner
            .detach(|state| state.story_id() == Some(story_id))
        else {
            return false;
        };
        info!(?trigger, story_id, "playback cancelled");
        match Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(detached.release());
            }
            Err(_) => warn!(story_id, "no runtime to release sound on, dropping handle"),
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{sample_story, story_with_audio, MockAudioBackend};
    use std::time::Duration;

    fn manager() -> (Arc<MockAudioBackend>, PlaybackManager) {
        let backend = Arc::new(MockAudioBackend::new());
        (backend.clone(), PlaybackManager::new(backend))
    }

    #[tokio::test]
    async fn test_stop_when_idle_is_noop() {
        let (backend, manager) = manager();
        assert!(!manager.stop().await);
        assert!(!manager.stop().await);
        assert_eq!(manager.state(), PlaybackState::Idle);
        assert_eq!(backend.created(), 0);
    }

    #[tokio::test]
    async fn test_play_then_stop() {
        let (backend, manager) = manager();
        let story = story_with_audio("s1", 1);

        let session = manager.play(&story).await.unwrap();
        assert_eq!(
            manager.state(),
            PlaybackState::Playing {
                story_id: "s1".into(),
                session
            }
        );
        assert_eq!(backend.playing(), 1);
        assert_eq!(backend.last_mode(), Some(AudioMode::STORY_PLAYBACK));

        assert!(manager.stop().await);
        assert!(manager.state().is_idle());
        assert_eq!(backend.playing(), 0);
        assert_eq!(backend.loaded(), 0);
    }

    #[tokio::test]
    async fn test_missing_audio_is_precondition() {
        let (backend, manager) = manager();
        let err = manager.play(&sample_story("s1", 1)).await.unwrap_err();

        assert_eq!(
            err,
            PlaybackError::MissingAudio {
                story_id: "s1".into()
            }
        );
        assert!(err.is_precondition());
        assert!(manager.state().is_idle());
        assert_eq!(backend.permission_requests(), 0);
        assert_eq!(backend.created(), 0);
    }

    #[tokio::test]
    async fn test_permission_denied() {
        let (backend, manager) = manager();
        backend.deny_permission();

        let err = manager.play(&story_with_audio("s1", 1)).await.unwrap_err();
        assert_eq!(err, PlaybackError::PermissionDenied);
        assert!(manager.state().is_idle());
        assert_eq!(backend.created(), 0);
    }

    #[tokio::test]
    async fn test_creation_failure_returns_to_idle() {
        let (backend, manager) = manager();
        backend.fail_next_create(PlaybackError::Resource("bad codec".into()));

        let err = manager.play(&story_with_audio("s1", 1)).await.unwrap_err();
        assert_eq!(err, PlaybackError::Resource("bad codec".into()));
        assert!(manager.state().is_idle());
    }

    #[tokio::test]
    async fn test_play_failure_releases_sound() {
        let (backend, manager) = manager();
        backend.fail_next_play(PlaybackError::Resource("device busy".into()));

        let err = manager.play(&story_with_audio("s1", 1)).await.unwrap_err();
        assert_eq!(err, PlaybackError::Resource("device busy".into()));
        assert!(manager.state().is_idle());
        assert_eq!(backend.created(), 1);
        assert_eq!(backend.loaded(), 0);
    }

    #[tokio::test]
    async fn test_natural_finish_releases() {
        let (backend, manager) = manager();
        manager.play(&story_with_audio("s1", 1)).await.unwrap();

        backend.finish_all();
        assert!(manager.state().is_idle());

        // Release runs on a spawned task.
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        assert_eq!(backend.loaded(), 0);
    }

    #[tokio::test]
    async fn test_sound_failure_releases() {
        let (backend, manager) = manager();
        manager.play(&story_with_audio("s1", 1)).await.unwrap();

        backend.fail_all("decoder crashed");
        assert!(manager.state().is_idle());
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        assert_eq!(backend.loaded(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_while_starting_is_reported() {
        let backend = Arc::new(MockAudioBackend::new().with_latency(Duration::from_millis(100)));
        let manager = PlaybackManager::new(backend.clone());
        let story = story_with_audio("s1", 1);

        // Permission and creation take 200ms; the start is confirmed at 300ms.
        let playing = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.play(&story).await })
        };
        tokio::time::sleep(Duration::from_millis(250)).await;
        backend.fail_all("decoder crashed");

        let err = playing.await.unwrap().unwrap_err();
        assert_eq!(err, PlaybackError::Resource("decoder crashed".into()));
        assert!(manager.state().is_idle());
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(backend.loaded(), 0);
        assert_eq!(backend.unload_calls(), 1);
    }

    #[tokio::test]
    async fn test_cancel_is_scoped_to_story() {
        let (backend, manager) = manager();
        manager.play(&story_with_audio("s1", 1)).await.unwrap();

        assert!(!manager.cancel(PlaybackTrigger::FocusLost, "other").await);
        assert!(manager.is_playing());

        assert!(manager.cancel(PlaybackTrigger::FocusLost, "s1").await);
        assert!(manager.state().is_idle());
        assert_eq!(backend.loaded(), 0);
    }

    #[tokio::test]
    async fn test_subscribers_see_transitions() {
        let (_backend, manager) = manager();
        let mut states = manager.subscribe();

        manager.play(&story_with_audio("s1", 1)).await.unwrap();
        assert!(states.borrow_and_update().is_playing());

        manager.stop().await;
        assert!(states.has_changed().unwrap());
        assert!(states.borrow_and_update().is_idle());
    }
}
