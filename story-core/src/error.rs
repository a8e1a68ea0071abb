//! Error types for the story core.
//!
//! Every failure reaches the caller as a value; nothing here panics on a bad
//! response or a lost race.

use crate::id::SessionId;
use thiserror::Error;

/// Main error type for cache, mutation and playback operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoryError {
    /// Network unreachable, timed out, or an unreadable response.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The service answered with a non-success status.
    #[error("Request rejected (status {status}): {message}")]
    Rejected { status: u16, message: String },

    /// A required field was missing before anything was attempted.
    #[error("Precondition failed: {0}")]
    Precondition(String),

    #[error("Playback error: {0}")]
    Playback(#[from] PlaybackError),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl StoryError {
    /// True for failures of the remote service (transport or rejection).
    pub fn is_remote(&self) -> bool {
        matches!(self, StoryError::Transport(_) | StoryError::Rejected { .. })
    }
}

impl From<story_api::Error> for StoryError {
    fn from(err: story_api::Error) -> Self {
        match err {
            story_api::Error::Network(msg) => StoryError::Transport(msg),
            story_api::Error::Parse(msg) => StoryError::Transport(format!("bad response: {msg}")),
            story_api::Error::Api { status, message } => StoryError::Rejected { status, message },
            story_api::Error::Config(msg) => StoryError::Config(msg),
        }
    }
}

impl From<story_api::InputProblem> for StoryError {
    fn from(problem: story_api::InputProblem) -> Self {
        StoryError::Precondition(problem.to_string())
    }
}

/// Playback-specific errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlaybackError {
    /// The story has no playable audio URL.
    #[error("Story {story_id} has no audio")]
    MissingAudio { story_id: String },

    #[error("Audio playback permission denied")]
    PermissionDenied,

    /// Creating, starting or decoding the sound failed.
    #[error("Audio resource error: {0}")]
    Resource(String),

    /// A stop or a newer play arrived while this session was still acquiring.
    #[error("Playback session {0} was superseded")]
    Superseded(SessionId),
}

impl PlaybackError {
    /// True for errors raised before any resource was requested.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            PlaybackError::MissingAudio { .. } | PlaybackError::PermissionDenied
        )
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, StoryError>;

/// Result type for playback operations
pub type PlaybackResult<T> = std::result::Result<T, PlaybackError>;
