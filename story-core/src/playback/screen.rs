//! Binding between a reading screen and the playback manager.

use super::PlaybackManager;
use crate::error::PlaybackResult;
use story_api::Story;
use tracing::debug;

/// What ended (or tried to end) a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackTrigger {
    /// The user switched the play control off.
    UserToggle,
    /// The screen lost focus but stays mounted.
    FocusLost,
    /// The screen is about to be popped.
    BeforeRemove,
    /// The app left the active foreground state.
    AppBackgrounded,
    Unmount,
    /// The screen now displays a different story.
    StoryChanged,
}

/// Foreground state of the app as reported by the platform.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AppState {
    #[default]
    Active,
    Inactive,
    Background,
}

/// Playback as seen from one screen displaying one story.
///
/// Each platform event maps to one method, and each of them funnels into
/// [`PlaybackManager::cancel`] scoped to the displayed story, so a screen
/// never stops audio that another screen started.
///
/// Dropping the binding counts as an unmount.
pub struct ScreenPlayback {
    manager: PlaybackManager,
    story: Story,
    unmounted: bool,
}

impl ScreenPlayback {
    pub fn new(manager: PlaybackManager, story: Story) -> Self {
        Self {
            manager,
            story,
            unmounted: false,
        }
    }

    pub fn story(&self) -> &Story {
        &self.story
    }

    /// True while this screen's story owns the live session.
    pub fn is_active(&self) -> bool {
        self.manager.state().story_id() == Some(self.story.id.as_str())
    }

    pub fn is_playing(&self) -> bool {
        let state = self.manager.state();
        state.is_playing() && state.story_id() == Some(self.story.id.as_str())
    }

    /// The play/stop control. Returns whether audio is now requested on.
    ///
    /// "Active" includes a session of this screen that is still acquiring, so
    /// a second toggle before the sound starts stops it rather than
    /// restarting it; the first toggle's call then returns `Superseded`.
    pub async fn toggle(&self) -> PlaybackResult<bool> {
        if self.is_active() {
            self.manager
                .cancel(PlaybackTrigger::UserToggle, &self.story.id)
                .await;
            return Ok(false);
        }
        self.manager.play(&self.story).await?;
        Ok(true)
    }

    pub async fn on_blur(&self) -> bool {
        self.manager
            .cancel(PlaybackTrigger::FocusLost, &self.story.id)
            .await
    }

    pub async fn on_before_remove(&self) -> bool {
        self.manager
            .cancel(PlaybackTrigger::BeforeRemove, &self.story.id)
            .await
    }

    pub async fn on_app_state(&self, state: AppState) -> bool {
        if state == AppState::Active {
            return false;
        }
        self.manager
            .cancel(PlaybackTrigger::AppBackgrounded, &self.story.id)
            .await
    }

    /// Show `story` instead. Playback of the previous story ends.
    pub async fn set_story(&mut self, story: Story) -> bool {
        if story.id == self.story.id {
            self.story = story;
            return false;
        }
        let cancelled = self
            .manager
            .cancel(PlaybackTrigger::StoryChanged, &self.story.id)
            .await;
        debug!(from = %self.story.id, to = %story.id, "screen story changed");
        self.story = story;
        cancelled
    }

    pub async fn unmount(mut self) -> bool {
        self.unmounted = true;
        self.manager
            .cancel(PlaybackTrigger::Unmount, &self.story.id)
            .await
    }
}

impl Drop for ScreenPlayback {
    fn drop(&mut self) {
        if !self.unmounted {
            self.manager
                .cancel_now(PlaybackTrigger::Unmount, &self.story.id);
        }
    }
}
