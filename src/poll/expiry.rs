use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::sleep;

use super::question::QuestionId;
use super::room::RoomCode;

/// A question whose advisory duration ran out
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpiredQuestion {
    pub room: RoomCode,
    pub question_id: QuestionId,
}

/// Hook invoked whenever a question opens. The default never closes
/// questions on its own; the teacher ends them manually.
pub trait ExpiryScheduler: Send + Sync {
    fn schedule(&self, room: RoomCode, question_id: QuestionId, after: Duration);
}

pub struct ManualClose;

impl ExpiryScheduler for ManualClose {
    fn schedule(&self, _room: RoomCode, _question_id: QuestionId, _after: Duration) {}
}

/// Fires an `ExpiredQuestion` on a channel once the duration elapses.
/// Whoever drains the channel decides whether the question is still open.
pub struct TimerExpiry {
    sender: mpsc::UnboundedSender<ExpiredQuestion>,
}

impl TimerExpiry {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ExpiredQuestion>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl ExpiryScheduler for TimerExpiry {
    fn schedule(&self, room: RoomCode, question_id: QuestionId, after: Duration) {
        if after.is_zero() {
            return;
        }

        let sender = self.sender.clone();
        tokio::spawn(async move {
            sleep(after).await;
            if sender.send(ExpiredQuestion { room, question_id }).is_err() {
                tracing::debug!(question_id, "Expiry receiver dropped");
            }
        });
    }
}
