use std::collections::HashMap;
use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

use super::question::{ArchivedQuestion, Question, QuestionDraft, QuestionId};
use crate::error::{PollError, Result};

/// Room code used when a client joins with a blank code
pub const DEFAULT_ROOM_CODE: &str = "DEFAULT";

/// Opaque identity of a live connection, assigned by the server at upgrade
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Generate a random 16 hex character connection id
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        Self(format!("{:016x}", rng.gen::<u64>()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ConnectionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Normalized, case-insensitive room code
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct RoomCode(String);

impl RoomCode {
    /// Trim and uppercase a raw code, falling back to the default room
    pub fn normalize(raw: &str) -> Self {
        let code = raw.trim().to_uppercase();
        if code.is_empty() {
            Self(DEFAULT_ROOM_CODE.to_string())
        } else {
            Self(code)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Teacher,
    Student,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Teacher => f.write_str("teacher"),
            Role::Student => f.write_str("student"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Participant {
    pub name: String,
    pub role: Role,
}

/// A polling room: roster, teacher seat, the open question and archived ones
#[derive(Debug)]
pub struct Room {
    code: RoomCode,
    teacher_id: Option<ConnectionId>,
    participants: HashMap<ConnectionId, Participant>,
    current_question: Option<Question>,
    /// Most recent first
    history: Vec<ArchivedQuestion>,
    next_question_id: QuestionId,
}

impl Room {
    pub fn new(code: RoomCode) -> Self {
        Self {
            code,
            teacher_id: None,
            participants: HashMap::new(),
            current_question: None,
            history: Vec::new(),
            next_question_id: 1,
        }
    }

    pub fn code(&self) -> &RoomCode {
        &self.code
    }

    pub fn teacher_id(&self) -> Option<&ConnectionId> {
        self.teacher_id.as_ref()
    }

    pub fn is_teacher(&self, id: &ConnectionId) -> bool {
        self.teacher_id.as_ref() == Some(id)
    }

    pub fn participants(&self) -> &HashMap<ConnectionId, Participant> {
        &self.participants
    }

    pub fn participant(&self, id: &ConnectionId) -> Option<&Participant> {
        self.participants.get(id)
    }

    pub fn current_question(&self) -> Option<&Question> {
        self.current_question.as_ref()
    }

    pub fn current_question_mut(&mut self) -> Option<&mut Question> {
        self.current_question.as_mut()
    }

    pub fn history(&self) -> &[ArchivedQuestion] {
        &self.history
    }

    /// Check whether `id` could take the teacher seat without claiming it
    pub fn check_teacher_seat(&self, id: &ConnectionId) -> Result<()> {
        match &self.teacher_id {
            Some(holder) if holder != id => Err(PollError::TeacherSeatTaken),
            _ => Ok(()),
        }
    }

    pub fn claim_teacher_seat(&mut self, id: &ConnectionId) -> Result<()> {
        self.check_teacher_seat(id)?;
        self.teacher_id = Some(id.clone());
        Ok(())
    }

    /// Clear the seat and abandon any open question without archiving it
    pub fn release_teacher_seat(&mut self) -> Option<Question> {
        self.teacher_id = None;
        self.current_question.take()
    }

    /// Only reachable through the registry so the connection index stays in step
    pub(super) fn insert_participant(&mut self, id: ConnectionId, participant: Participant) {
        self.participants.insert(id, participant);
    }

    pub(super) fn remove_participant(&mut self, id: &ConnectionId) -> Option<Participant> {
        self.participants.remove(id)
    }

    /// Open a new question, replacing (and discarding) any unclosed one
    pub fn open_question(&mut self, draft: QuestionDraft, started_at: u64) -> &Question {
        let id = self.next_question_id;
        self.next_question_id += 1;

        if let Some(previous) = self.current_question.take() {
            tracing::debug!(
                room = %self.code,
                question_id = previous.id,
                "Discarding unclosed question"
            );
        }

        self.current_question.insert(Question::new(id, draft, started_at))
    }

    /// Archive the open question with its final counts
    pub fn close_question(&mut self) -> Result<&ArchivedQuestion> {
        let question = self.current_question.take().ok_or(PollError::NoOpenQuestion)?;
        self.history.insert(0, ArchivedQuestion::from(question));
        Ok(&self.history[0])
    }
}
