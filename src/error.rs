use thiserror::Error;

use crate::poll::{ConnectionId, QuestionId};

/// Reasons an intent can be rejected by the session controller
#[derive(Debug, Error)]
pub enum PollError {
    /// Ownership errors
    #[error("Teacher already connected for this room.")]
    TeacherSeatTaken,

    #[error("Connection {0} is not the teacher of its room")]
    NotTeacher(ConnectionId),

    #[error("Teacher cannot kick themself")]
    CannotKickSelf,

    /// Resolution errors
    #[error("Connection {0} is not in any room")]
    UnknownConnection(ConnectionId),

    #[error("{0} is not a participant of this room")]
    NotParticipant(ConnectionId),

    /// Question state errors
    #[error("No open question in room")]
    NoOpenQuestion,

    #[error("Question {0} is no longer open")]
    StaleQuestion(QuestionId),

    /// Payload errors
    #[error("Invalid question: {0}")]
    InvalidQuestion(String),

    #[error("Chat message is empty")]
    EmptyMessage,

    #[error("Failed to serialize message: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

/// Convenience type alias for Results using PollError
pub type Result<T> = std::result::Result<T, PollError>;

impl PollError {
    /// Whether the rejection is reported back to the caller.
    /// Everything except a taken teacher seat fails silently.
    pub fn is_user_visible(&self) -> bool {
        matches!(self, PollError::TeacherSeatTaken)
    }
}
