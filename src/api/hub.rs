use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex, RwLock};
use warp::ws::Message;

use crate::config::PollConfig;
use crate::error::Result;
use crate::poll::expiry::{ExpiredQuestion, ExpiryScheduler, ManualClose, TimerExpiry};
use crate::poll::{ClientMessage, ConnectionId, Dispatch, ServerMessage, SessionController};

/// Connects websocket sessions to the session controller.
///
/// All intents go through one controller lock and are delivered before the
/// lock is released, so every room sees notifications in intent order.
pub struct PollHub {
    controller: Mutex<SessionController>,
    connections: RwLock<HashMap<ConnectionId, mpsc::UnboundedSender<Message>>>,
    expiry: Box<dyn ExpiryScheduler>,
    expired_receiver: Mutex<Option<mpsc::UnboundedReceiver<ExpiredQuestion>>>,
}

impl PollHub {
    /// Must be called inside a tokio runtime when auto-close is enabled
    pub fn new(config: &PollConfig) -> Arc<Self> {
        let (expiry, receiver): (Box<dyn ExpiryScheduler>, _) = if config.auto_close {
            let (timer, receiver) = TimerExpiry::new();
            (Box::new(timer), Some(receiver))
        } else {
            (Box::new(ManualClose), None)
        };
        let auto_close = receiver.is_some();

        let hub = Arc::new(Self {
            controller: Mutex::new(SessionController::new()),
            connections: RwLock::new(HashMap::new()),
            expiry,
            expired_receiver: Mutex::new(receiver),
        });

        if auto_close {
            hub.clone().start_expiry_processing();
            tracing::info!("Questions close automatically when their duration elapses");
        }

        hub
    }

    fn start_expiry_processing(self: Arc<Self>) {
        tokio::spawn(async move {
            let receiver = self.expired_receiver.lock().await.take();

            if let Some(mut rx) = receiver {
                while let Some(expired) = rx.recv().await {
                    self.expire(expired).await;
                }
            }
        });
    }

    /// Register a new connection and return its identity
    pub async fn connect(&self, sender: mpsc::UnboundedSender<Message>) -> ConnectionId {
        let connection_id = ConnectionId::generate();
        self.connections.write().await.insert(connection_id.clone(), sender);
        connection_id
    }

    pub async fn handle(&self, caller: &ConnectionId, message: ClientMessage) {
        let mut controller = self.controller.lock().await;

        match controller.handle(caller, message) {
            Ok(dispatches) => self.deliver(&controller, dispatches).await,
            Err(e) if e.is_user_visible() => {
                tracing::info!(connection_id = %caller, reason = %e, "Join refused");
                let dispatch = Dispatch::connection(caller, ServerMessage::JoinError { message: e.to_string() });
                self.deliver(&controller, vec![dispatch]).await;
            }
            Err(e) => {
                tracing::debug!(connection_id = %caller, reason = %e, "Intent ignored");
            }
        }
    }

    pub async fn disconnect(&self, caller: &ConnectionId) {
        let mut controller = self.controller.lock().await;
        let dispatches = controller.disconnect(caller);
        self.connections.write().await.remove(caller);
        self.deliver(&controller, dispatches).await;
    }

    async fn expire(&self, expired: ExpiredQuestion) {
        let mut controller = self.controller.lock().await;

        match controller.expire_question(&expired.room, expired.question_id) {
            Ok(dispatches) => {
                tracing::info!(
                    room = %expired.room,
                    question_id = expired.question_id,
                    "Question duration elapsed"
                );
                self.deliver(&controller, dispatches).await;
            }
            Err(e) => {
                tracing::debug!(room = %expired.room, reason = %e, "Expiry ignored");
            }
        }
    }

    /// Number of rooms and of live connections
    pub async fn stats(&self) -> (usize, usize) {
        let rooms = self.controller.lock().await.registry().room_count();
        let connections = self.connections.read().await.len();
        (rooms, connections)
    }

    async fn deliver(&self, controller: &SessionController, dispatches: Vec<Dispatch>) {
        let connections = self.connections.read().await;

        for dispatch in dispatches {
            if let Dispatch::Room { room, message: ServerMessage::NewQuestion(question) } = &dispatch {
                self.expiry
                    .schedule(room.clone(), question.id, Duration::from_secs(question.duration));
            }

            let payload = match encode(dispatch.message()) {
                Ok(payload) => payload,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to encode outbound message");
                    continue;
                }
            };

            match &dispatch {
                Dispatch::Room { room, message } => {
                    let Some(room_state) = controller.registry().room(room) else {
                        continue;
                    };
                    for recipient in room_state.participants().keys() {
                        send(&connections, recipient, &payload);
                    }
                    tracing::debug!(
                        room = %room,
                        kind = message.kind(),
                        recipients = room_state.participants().len(),
                        "Broadcast to room"
                    );
                }
                Dispatch::Connection { connection, message } => {
                    send(&connections, connection, &payload);
                    tracing::debug!(connection_id = %connection, kind = message.kind(), "Sent to connection");
                }
            }
        }
    }
}

fn encode(message: &ServerMessage) -> Result<String> {
    Ok(serde_json::to_string(message)?)
}

fn send(
    connections: &HashMap<ConnectionId, mpsc::UnboundedSender<Message>>,
    recipient: &ConnectionId,
    payload: &str,
) {
    if let Some(sender) = connections.get(recipient) {
        if sender.send(Message::text(payload)).is_err() {
            tracing::debug!(connection_id = %recipient, "Connection closed before delivery");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::poll::Role;

    async fn connect(hub: &PollHub) -> (ConnectionId, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (hub.connect(tx).await, rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Message>) -> Vec<serde_json::Value> {
        let mut messages = Vec::new();
        while let Ok(message) = rx.try_recv() {
            let text = message.to_str().expect("text frame");
            messages.push(serde_json::from_str(text).unwrap());
        }
        messages
    }

    fn join(room: &str, role: Role, name: &str) -> ClientMessage {
        ClientMessage::JoinRoom {
            room_code: room.to_string(),
            role,
            name: name.to_string(),
        }
    }

    #[tokio::test]
    async fn test_second_teacher_gets_join_error_only() {
        let hub = PollHub::new(&PollConfig { auto_close: false });
        let (first, mut first_rx) = connect(&hub).await;
        let (second, mut second_rx) = connect(&hub).await;

        hub.handle(&first, join("y", Role::Teacher, "One")).await;
        drain(&mut first_rx);

        hub.handle(&second, join("y", Role::Teacher, "Two")).await;

        let messages = drain(&mut second_rx);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["type"], "joinError");
        assert_eq!(messages[0]["message"], "Teacher already connected for this room.");

        // The room never hears about the refused join
        assert!(drain(&mut first_rx).is_empty());
    }

    #[tokio::test]
    async fn test_room_broadcast_excludes_other_rooms() {
        let hub = PollHub::new(&PollConfig { auto_close: false });
        let (a, mut a_rx) = connect(&hub).await;
        let (b, mut b_rx) = connect(&hub).await;

        hub.handle(&a, join("one", Role::Student, "A")).await;
        hub.handle(&b, join("two", Role::Student, "B")).await;
        drain(&mut a_rx);
        drain(&mut b_rx);

        hub.handle(&a, ClientMessage::ChatMessage { text: "hi".to_string() }).await;

        let messages = drain(&mut a_rx);
        assert_eq!(messages[0]["type"], "chatMessage");
        assert_eq!(messages[0]["from"], "A");
        assert!(drain(&mut b_rx).is_empty());
    }

    #[tokio::test]
    async fn test_silent_rejections_send_nothing() {
        let hub = PollHub::new(&PollConfig { auto_close: false });
        let (student, mut rx) = connect(&hub).await;
        hub.handle(&student, join("x", Role::Student, "S")).await;
        drain(&mut rx);

        hub.handle(&student, ClientMessage::EndQuestion).await;
        hub.handle(&student, ClientMessage::SubmitAnswer { option_index: Some(0) }).await;
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_forgets_connection() {
        let hub = PollHub::new(&PollConfig { auto_close: false });
        let (student, _rx) = connect(&hub).await;
        hub.handle(&student, join("x", Role::Student, "S")).await;
        assert_eq!(hub.stats().await, (1, 1));

        hub.disconnect(&student).await;
        assert_eq!(hub.stats().await, (1, 0));
    }

    #[tokio::test]
    async fn test_auto_close_archives_expired_question() {
        let hub = PollHub::new(&PollConfig { auto_close: true });
        let (teacher, mut rx) = connect(&hub).await;
        hub.handle(&teacher, join("timed", Role::Teacher, "T")).await;

        let draft = serde_json::from_value(serde_json::json!({
            "text": "Quick?",
            "options": [{"text": "yes"}, {"text": "no"}],
            "duration": 1
        }))
        .unwrap();
        hub.handle(&teacher, ClientMessage::CreateQuestion(draft)).await;

        let ended = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let message = rx.recv().await.expect("channel open");
                let value: serde_json::Value = serde_json::from_str(message.to_str().unwrap()).unwrap();
                if value["type"] == "questionEnded" {
                    return value;
                }
            }
        })
        .await
        .expect("question was not closed");

        assert_eq!(ended["history"][0]["text"], "Quick?");
        assert_eq!(ended["history"][0]["results"], serde_json::json!([0, 0]));
    }
}
