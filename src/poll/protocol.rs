use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::question::{lenient_index, ArchivedQuestion, Question, QuestionDraft};
use super::room::{ConnectionId, Participant, Role, Room, RoomCode};

/// Inbound named messages, tagged by `"type"`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    #[serde(rename_all = "camelCase")]
    JoinRoom {
        room_code: String,
        role: Role,
        name: String,
    },

    CreateQuestion(QuestionDraft),

    #[serde(rename_all = "camelCase")]
    SubmitAnswer {
        #[serde(default, deserialize_with = "lenient_index")]
        option_index: Option<i64>,
    },

    EndQuestion,

    ChatMessage {
        text: String,
    },

    #[serde(rename_all = "camelCase")]
    KickUser {
        target_id: ConnectionId,
    },
}

/// Outbound named messages, tagged by `"type"`
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    JoinError {
        message: String,
    },

    #[serde(rename_all = "camelCase")]
    Joined {
        room_code: RoomCode,
        role: Role,
        name: String,
        connection_id: ConnectionId,
        history: Vec<ArchivedQuestion>,
        current_question: Option<Question>,
    },

    #[serde(rename_all = "camelCase")]
    ParticipantsUpdate {
        participants: HashMap<ConnectionId, Participant>,
        teacher_id: Option<ConnectionId>,
    },

    NewQuestion(Question),

    ResultsUpdate {
        counts: Vec<u32>,
    },

    QuestionEnded {
        history: Vec<ArchivedQuestion>,
    },

    ChatMessage {
        from: String,
        role: Role,
        text: String,
        /// Unix milliseconds
        at: u64,
    },

    Kicked,

    TeacherLeft,
}

impl ServerMessage {
    pub fn roster(room: &Room) -> Self {
        ServerMessage::ParticipantsUpdate {
            participants: room.participants().clone(),
            teacher_id: room.teacher_id().cloned(),
        }
    }

    pub fn question_ended(room: &Room) -> Self {
        ServerMessage::QuestionEnded {
            history: room.history().to_vec(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::JoinError { .. } => "joinError",
            ServerMessage::Joined { .. } => "joined",
            ServerMessage::ParticipantsUpdate { .. } => "participantsUpdate",
            ServerMessage::NewQuestion(_) => "newQuestion",
            ServerMessage::ResultsUpdate { .. } => "resultsUpdate",
            ServerMessage::QuestionEnded { .. } => "questionEnded",
            ServerMessage::ChatMessage { .. } => "chatMessage",
            ServerMessage::Kicked => "kicked",
            ServerMessage::TeacherLeft => "teacherLeft",
        }
    }
}

/// Where an outbound message goes
#[derive(Debug, Clone)]
pub enum Dispatch {
    /// Every current participant of the room
    Room { room: RoomCode, message: ServerMessage },
    /// A single connection, whether or not it is still in a room
    Connection { connection: ConnectionId, message: ServerMessage },
}

impl Dispatch {
    pub fn room(room: &RoomCode, message: ServerMessage) -> Self {
        Dispatch::Room {
            room: room.clone(),
            message,
        }
    }

    pub fn connection(connection: &ConnectionId, message: ServerMessage) -> Self {
        Dispatch::Connection {
            connection: connection.clone(),
            message,
        }
    }

    pub fn message(&self) -> &ServerMessage {
        match self {
            Dispatch::Room { message, .. } | Dispatch::Connection { message, .. } => message,
        }
    }
}
