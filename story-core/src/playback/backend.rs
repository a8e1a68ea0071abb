//! Platform audio seam.

use super::SoundEventSink;
use crate::error::PlaybackResult;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// How the platform should treat our audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioMode {
    /// Play even when the device is switched to silent.
    pub plays_in_silent_mode: bool,
    /// Keep playing after the app leaves the foreground.
    pub stays_active_in_background: bool,
}

impl AudioMode {
    /// Mode used for reading stories aloud.
    pub const STORY_PLAYBACK: AudioMode = AudioMode {
        plays_in_silent_mode: true,
        stays_active_in_background: false,
    };
}

/// Something a sound reports on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SoundEvent {
    /// Playback reached the end.
    Finished,
    /// Decoding or output failed mid-playback.
    Failed(String),
}

/// The platform audio API.
#[async_trait]
pub trait AudioBackend: Send + Sync {
    /// Ask for permission to play audio. `Ok(false)` means denied.
    async fn request_permission(&self) -> PlaybackResult<bool>;

    async fn set_audio_mode(&self, mode: AudioMode) -> PlaybackResult<()>;

    /// Load a sound from `url` without starting it.
    ///
    /// The sound reports completion and failures through `events`.
    async fn create_sound(
        &self,
        url: &str,
        events: SoundEventSink,
    ) -> PlaybackResult<Box<dyn SoundHandle>>;
}

/// One loaded sound.
#[async_trait]
pub trait SoundHandle: Send + Sync {
    async fn play(&self) -> PlaybackResult<()>;

    async fn stop(&self) -> PlaybackResult<()>;

    /// Free the decoder. The handle is unusable afterwards.
    async fn unload(&self) -> PlaybackResult<()>;
}

/// A backend that plays silence for a fixed time.
///
/// Used by the command-line driver, where no audio device is assumed.
#[derive(Debug, Clone)]
pub struct NullAudioBackend {
    duration: Duration,
}

impl NullAudioBackend {
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }
}

#[async_trait]
impl AudioBackend for NullAudioBackend {
    async fn request_permission(&self) -> PlaybackResult<bool> {
        Ok(true)
    }

    async fn set_audio_mode(&self, mode: AudioMode) -> PlaybackResult<()> {
        debug!(?mode, "audio mode set");
        Ok(())
    }

    async fn create_sound(
        &self,
        url: &str,
        events: SoundEventSink,
    ) -> PlaybackResult<Box<dyn SoundHandle>> {
        debug!(url, "silent sound created");
        Ok(Box::new(SilentSound {
            duration: self.duration,
            events,
            stopped: Arc::new(AtomicBool::new(false)),
        }))
    }
}

struct SilentSound {
    duration: Duration,
    events: SoundEventSink,
    stopped: Arc<AtomicBool>,
}

#[async_trait]
impl SoundHandle for SilentSound {
    async fn play(&self) -> PlaybackResult<()> {
        let duration = self.duration;
        let events = self.events.clone();
        let stopped = Arc::clone(&self.stopped);
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            if !stopped.load(Ordering::SeqCst) {
                events.emit(SoundEvent::Finished);
            }
        });
        Ok(())
    }

    async fn stop(&self) -> PlaybackResult<()> {
        self.stopped.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn unload(&self) -> PlaybackResult<()> {
        self.stopped.store(true, Ordering::SeqCst);
        Ok(())
    }
}
