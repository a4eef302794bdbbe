//! Client session errors.

use collab_core::CollabError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClientError {
    /// Error raised by the change engine or returned by the backend
    #[error(transparent)]
    Core(#[from] CollabError),

    #[error("Session has no backend to submit to")]
    NoBackend,

    #[error("Timed out waiting for replay on '{channel}' ({received}/{expected} received)")]
    ReplayTimeout {
        channel: String,
        received: usize,
        expected: usize,
    },

    #[error("Replay channel '{0}' closed before the stream completed")]
    ReplayInterrupted(String),

    #[error("Replay failed after {attempts} attempts: {last_error}")]
    ReplayFailed { attempts: u32, last_error: String },
}

impl ClientError {
    /// Whether the message is meant for the end user rather than the logs.
    pub fn is_user_facing(&self) -> bool {
        matches!(self, ClientError::Core(e) if e.is_user_facing())
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
