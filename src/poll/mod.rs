mod aggregator;
mod controller;
pub mod expiry;
mod protocol;
mod question;
mod registry;
mod room;

use std::time::{SystemTime, UNIX_EPOCH};

pub use aggregator::ResultAggregator;
pub use controller::SessionController;
pub use protocol::{ClientMessage, Dispatch, ServerMessage};
pub use question::{AnswerOption, ArchivedQuestion, Question, QuestionDraft, QuestionId, Response};
pub use registry::{MemoryRoomStore, RoomRegistry, RoomStore};
pub use room::{ConnectionId, Participant, Role, Room, RoomCode, DEFAULT_ROOM_CODE};

/// Wall-clock time in Unix milliseconds, as carried on the wire
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}
