use super::protocol::{ClientMessage, Dispatch, ServerMessage};
use super::question::{QuestionDraft, QuestionId, Response};
use super::registry::{MemoryRoomStore, RoomRegistry, RoomStore};
use super::room::{ConnectionId, Participant, Role, Room, RoomCode};
use super::unix_millis;
use crate::error::{PollError, Result};

/// Validates intents against room and question state, applies them and
/// returns the notifications to deliver.
///
/// Every handler runs to completion synchronously; callers must serialize
/// access (the hub holds it behind a single lock) so the order in which
/// intents arrive decides the final state.
pub struct SessionController<S: RoomStore = MemoryRoomStore> {
    registry: RoomRegistry<S>,
}

impl SessionController<MemoryRoomStore> {
    pub fn new() -> Self {
        Self::with_registry(RoomRegistry::new())
    }
}

impl Default for SessionController<MemoryRoomStore> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: RoomStore> SessionController<S> {
    pub fn with_registry(registry: RoomRegistry<S>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &RoomRegistry<S> {
        &self.registry
    }

    /// Route an inbound message to its handler
    pub fn handle(&mut self, caller: &ConnectionId, message: ClientMessage) -> Result<Vec<Dispatch>> {
        match message {
            ClientMessage::JoinRoom { room_code, role, name } => self.join(caller, &room_code, role, name),
            ClientMessage::CreateQuestion(draft) => self.create_question(caller, draft),
            ClientMessage::SubmitAnswer { option_index } => self.submit_answer(caller, option_index),
            ClientMessage::EndQuestion => self.end_question(caller),
            ClientMessage::ChatMessage { text } => self.chat(caller, &text),
            ClientMessage::KickUser { target_id } => self.kick(caller, &target_id),
        }
    }

    pub fn join(
        &mut self,
        caller: &ConnectionId,
        room_code: &str,
        role: Role,
        name: String,
    ) -> Result<Vec<Dispatch>> {
        let code = RoomCode::normalize(room_code);

        if role == Role::Teacher {
            self.registry.get_or_create(&code).check_teacher_seat(caller)?;
        }

        let mut dispatches = Vec::new();
        match self.registry.find_by_participant(caller).cloned() {
            Some(current) if current != code => dispatches.extend(self.leave(caller)),
            Some(_) if role == Role::Student => dispatches.extend(self.step_down(caller, &code)),
            _ => {}
        }

        if role == Role::Teacher {
            self.registry.get_or_create(&code).claim_teacher_seat(caller)?;
        }

        let participant = Participant {
            name: name.clone(),
            role,
        };
        let room = self.registry.admit(caller.clone(), &code, participant);

        tracing::info!(
            room = %code,
            connection_id = %caller,
            name = %name,
            role = %role,
            "Participant joined"
        );

        dispatches.push(Dispatch::connection(
            caller,
            ServerMessage::Joined {
                room_code: code.clone(),
                role,
                name,
                connection_id: caller.clone(),
                history: room.history().to_vec(),
                current_question: room.current_question().cloned(),
            },
        ));
        dispatches.push(Dispatch::room(&code, ServerMessage::roster(room)));

        Ok(dispatches)
    }

    pub fn create_question(&mut self, caller: &ConnectionId, draft: QuestionDraft) -> Result<Vec<Dispatch>> {
        let room = self.teacher_room_mut(caller)?;
        let draft = draft.validate()?;
        let question = room.open_question(draft, unix_millis()).clone();

        tracing::info!(
            room = %room.code(),
            question_id = question.id,
            options = question.options.len(),
            duration = question.duration,
            "Question opened"
        );

        Ok(vec![Dispatch::room(room.code(), ServerMessage::NewQuestion(question))])
    }

    pub fn submit_answer(&mut self, caller: &ConnectionId, option_index: Option<i64>) -> Result<Vec<Dispatch>> {
        let room = self.room_mut(caller)?;
        let code = room.code().clone();
        let question = room.current_question_mut().ok_or(PollError::NoOpenQuestion)?;

        question.record(caller.clone(), Response::new(option_index));
        let counts = question.counts();

        tracing::debug!(
            room = %code,
            connection_id = %caller,
            option_index = ?option_index,
            counts = ?counts,
            "Answer recorded"
        );

        Ok(vec![Dispatch::room(&code, ServerMessage::ResultsUpdate { counts })])
    }

    pub fn end_question(&mut self, caller: &ConnectionId) -> Result<Vec<Dispatch>> {
        let room = self.teacher_room_mut(caller)?;
        Self::archive(room)
    }

    /// Close a question whose timer ran out, unless it was already closed
    /// or replaced by a newer one
    pub fn expire_question(&mut self, code: &RoomCode, question_id: QuestionId) -> Result<Vec<Dispatch>> {
        let room = self
            .registry
            .room_mut(code)
            .ok_or(PollError::StaleQuestion(question_id))?;

        if room.current_question().map(|question| question.id) != Some(question_id) {
            return Err(PollError::StaleQuestion(question_id));
        }
        Self::archive(room)
    }

    pub fn chat(&mut self, caller: &ConnectionId, text: &str) -> Result<Vec<Dispatch>> {
        let room = self
            .registry
            .find_room(caller)
            .ok_or_else(|| PollError::UnknownConnection(caller.clone()))?;
        let participant = room
            .participant(caller)
            .ok_or_else(|| PollError::NotParticipant(caller.clone()))?;

        let text = text.trim();
        if text.is_empty() {
            return Err(PollError::EmptyMessage);
        }

        Ok(vec![Dispatch::room(
            room.code(),
            ServerMessage::ChatMessage {
                from: participant.name.clone(),
                role: participant.role,
                text: text.to_string(),
                at: unix_millis(),
            },
        )])
    }

    pub fn kick(&mut self, caller: &ConnectionId, target: &ConnectionId) -> Result<Vec<Dispatch>> {
        let room = self.teacher_room_mut(caller)?;
        if target == caller {
            return Err(PollError::CannotKickSelf);
        }
        if room.participant(target).is_none() {
            return Err(PollError::NotParticipant(target.clone()));
        }

        // A kicked student's answer stops counting immediately
        let recount = room.current_question_mut().and_then(|question| {
            let before = question.counts();
            question.withdraw(target)?;
            let after = question.counts();
            (after != before).then_some(after)
        });

        let code = room.code().clone();
        self.registry.evict(target);

        tracing::info!(room = %code, connection_id = %target, "Participant kicked");

        let mut dispatches = vec![Dispatch::connection(target, ServerMessage::Kicked)];
        if let Some(room) = self.registry.room(&code) {
            dispatches.push(Dispatch::room(&code, ServerMessage::roster(room)));
        }
        if let Some(counts) = recount {
            dispatches.push(Dispatch::room(&code, ServerMessage::ResultsUpdate { counts }));
        }

        Ok(dispatches)
    }

    /// Always succeeds; a connection that never joined produces nothing
    pub fn disconnect(&mut self, caller: &ConnectionId) -> Vec<Dispatch> {
        self.leave(caller)
    }

    fn leave(&mut self, caller: &ConnectionId) -> Vec<Dispatch> {
        let Some((code, participant)) = self.registry.evict(caller) else {
            return Vec::new();
        };
        let Some(room) = self.registry.room_mut(&code) else {
            return Vec::new();
        };

        let mut dispatches = Vec::new();
        if room.is_teacher(caller) {
            let abandoned = room.release_teacher_seat();
            tracing::info!(
                room = %code,
                abandoned_question = ?abandoned.map(|question| question.id),
                "Teacher left"
            );
            dispatches.push(Dispatch::room(&code, ServerMessage::TeacherLeft));
        }

        tracing::info!(
            room = %code,
            connection_id = %caller,
            name = %participant.name,
            "Participant left"
        );

        dispatches.push(Dispatch::room(&code, ServerMessage::roster(room)));
        dispatches
    }

    /// A teacher re-joining the same room as a student gives up the seat
    fn step_down(&mut self, caller: &ConnectionId, code: &RoomCode) -> Vec<Dispatch> {
        match self.registry.room_mut(code) {
            Some(room) if room.is_teacher(caller) => {
                room.release_teacher_seat();
                tracing::info!(room = %code, connection_id = %caller, "Teacher stepped down");
                vec![Dispatch::room(code, ServerMessage::TeacherLeft)]
            }
            _ => Vec::new(),
        }
    }

    fn archive(room: &mut Room) -> Result<Vec<Dispatch>> {
        let (question_id, results) = {
            let archived = room.close_question()?;
            (archived.question.id, archived.results.clone())
        };
        tracing::info!(
            room = %room.code(),
            question_id,
            results = ?results,
            "Question closed"
        );

        Ok(vec![Dispatch::room(room.code(), ServerMessage::question_ended(room))])
    }

    fn room_mut(&mut self, caller: &ConnectionId) -> Result<&mut Room> {
        self.registry
            .find_room_mut(caller)
            .ok_or_else(|| PollError::UnknownConnection(caller.clone()))
    }

    fn teacher_room_mut(&mut self, caller: &ConnectionId) -> Result<&mut Room> {
        let room = self.room_mut(caller)?;
        if !room.is_teacher(caller) {
            return Err(PollError::NotTeacher(caller.clone()));
        }
        Ok(room)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::poll::question::AnswerOption;

    fn id(raw: &str) -> ConnectionId {
        ConnectionId::from(raw)
    }

    fn two_plus_two() -> QuestionDraft {
        QuestionDraft {
            text: "2+2?".to_string(),
            options: vec![AnswerOption::new("3", false), AnswerOption::new("4", true)],
            duration: 20,
        }
    }

    fn kinds(dispatches: &[Dispatch]) -> Vec<&'static str> {
        dispatches.iter().map(|d| d.message().kind()).collect()
    }

    fn last_counts(dispatches: &[Dispatch]) -> Vec<u32> {
        dispatches
            .iter()
            .rev()
            .find_map(|d| match d.message() {
                ServerMessage::ResultsUpdate { counts } => Some(counts.clone()),
                _ => None,
            })
            .expect("no resultsUpdate emitted")
    }

    fn room<'a>(controller: &'a SessionController, code: &str) -> &'a Room {
        controller.registry().room(&RoomCode::normalize(code)).unwrap()
    }

    /// Teacher T plus students S1 and S2 in MATH1
    fn math_class() -> SessionController {
        let mut controller = SessionController::new();
        controller.join(&id("T"), "math1", Role::Teacher, "Teacher".into()).unwrap();
        controller.join(&id("S1"), "MATH1", Role::Student, "Ann".into()).unwrap();
        controller.join(&id("S2"), " Math1 ", Role::Student, "Bob".into()).unwrap();
        controller
    }

    #[test]
    fn test_join_emits_snapshot_then_roster() {
        let mut controller = SessionController::new();
        let dispatches = controller.join(&id("T"), "math1", Role::Teacher, "Teacher".into()).unwrap();

        assert_eq!(kinds(&dispatches), vec!["joined", "participantsUpdate"]);
        match &dispatches[0] {
            Dispatch::Connection { connection, message: ServerMessage::Joined { room_code, history, current_question, .. } } => {
                assert_eq!(connection, &id("T"));
                assert_eq!(room_code.as_str(), "MATH1");
                assert!(history.is_empty());
                assert!(current_question.is_none());
            }
            other => panic!("unexpected dispatch: {:?}", other),
        }
        assert_eq!(room(&controller, "math1").teacher_id(), Some(&id("T")));
    }

    #[test]
    fn test_resubmission_scenario() {
        let mut controller = math_class();
        controller.create_question(&id("T"), two_plus_two()).unwrap();

        controller.submit_answer(&id("S1"), Some(1)).unwrap();
        controller.submit_answer(&id("S2"), Some(1)).unwrap();
        let dispatches = controller.submit_answer(&id("S1"), Some(0)).unwrap();
        assert_eq!(last_counts(&dispatches), vec![1, 1]);

        let question = room(&controller, "MATH1").current_question().unwrap();
        assert_eq!(question.responses().len(), 2);
        let live = question.counts();

        let dispatches = controller.end_question(&id("T")).unwrap();
        assert_eq!(kinds(&dispatches), vec!["questionEnded"]);

        let room = room(&controller, "MATH1");
        assert!(room.current_question().is_none());
        assert_eq!(room.history()[0].results, vec![1, 1]);
        assert_eq!(room.history()[0].results, live);
    }

    #[test]
    fn test_invalid_answers_are_stored_but_not_counted() {
        let mut controller = math_class();
        controller.create_question(&id("T"), two_plus_two()).unwrap();

        controller.submit_answer(&id("S1"), Some(1)).unwrap();
        // Overwrites the valid answer, then drops out of the tally
        let dispatches = controller.submit_answer(&id("S1"), Some(7)).unwrap();
        assert_eq!(last_counts(&dispatches), vec![0, 0]);

        let dispatches = controller.submit_answer(&id("S2"), None).unwrap();
        assert_eq!(last_counts(&dispatches), vec![0, 0]);
    }

    #[test]
    fn test_submit_without_open_question_is_rejected() {
        let mut controller = math_class();
        let err = controller.submit_answer(&id("S1"), Some(0)).unwrap_err();
        assert!(matches!(err, PollError::NoOpenQuestion));

        let err = controller.submit_answer(&id("stranger"), Some(0)).unwrap_err();
        assert!(matches!(err, PollError::UnknownConnection(_)));
    }

    #[test]
    fn test_student_before_teacher_cannot_run_the_room() {
        let mut controller = SessionController::new();
        controller.join(&id("S"), "x", Role::Student, "Sam".into()).unwrap();
        assert!(room(&controller, "X").teacher_id().is_none());

        assert!(matches!(
            controller.create_question(&id("S"), two_plus_two()),
            Err(PollError::NotTeacher(_))
        ));
        assert!(matches!(controller.end_question(&id("S")), Err(PollError::NotTeacher(_))));
        assert!(matches!(controller.kick(&id("S"), &id("S")), Err(PollError::NotTeacher(_))));

        let room = room(&controller, "X");
        assert!(room.current_question().is_none());
        assert_eq!(room.participants().len(), 1);
    }

    #[test]
    fn test_second_teacher_is_refused() {
        let mut controller = SessionController::new();
        controller.join(&id("T1"), "y", Role::Teacher, "First".into()).unwrap();

        let err = controller.join(&id("T2"), "Y", Role::Teacher, "Second".into()).unwrap_err();
        assert!(matches!(err, PollError::TeacherSeatTaken));

        let room = room(&controller, "Y");
        assert_eq!(room.teacher_id(), Some(&id("T1")));
        assert!(room.participant(&id("T2")).is_none());
        assert!(controller.registry().find_by_participant(&id("T2")).is_none());
    }

    #[test]
    fn test_teacher_disconnect_abandons_question() {
        let mut controller = math_class();
        controller.create_question(&id("T"), two_plus_two()).unwrap();
        controller.create_question(&id("T"), two_plus_two()).unwrap();
        controller.end_question(&id("T")).unwrap();
        controller.create_question(&id("T"), two_plus_two()).unwrap();
        controller.submit_answer(&id("S1"), Some(1)).unwrap();

        let dispatches = controller.disconnect(&id("T"));
        assert_eq!(kinds(&dispatches), vec!["teacherLeft", "participantsUpdate"]);

        let room = room(&controller, "MATH1");
        assert!(room.teacher_id().is_none());
        assert!(room.current_question().is_none());
        assert_eq!(room.history().len(), 1);
        assert_eq!(room.participants().len(), 2);
    }

    #[test]
    fn test_student_disconnect_only_updates_roster() {
        let mut controller = math_class();
        let dispatches = controller.disconnect(&id("S2"));
        assert_eq!(kinds(&dispatches), vec!["participantsUpdate"]);

        // Unknown connections disconnect silently
        assert!(controller.disconnect(&id("S2")).is_empty());
        assert!(controller.disconnect(&id("never-joined")).is_empty());
    }

    #[test]
    fn test_new_teacher_can_claim_seat_after_disconnect() {
        let mut controller = math_class();
        controller.disconnect(&id("T"));
        controller.join(&id("T2"), "math1", Role::Teacher, "Sub".into()).unwrap();
        assert_eq!(room(&controller, "MATH1").teacher_id(), Some(&id("T2")));
    }

    #[test]
    fn test_kick_removes_participant_and_their_answer() {
        let mut controller = math_class();
        controller.create_question(&id("T"), two_plus_two()).unwrap();
        controller.submit_answer(&id("S1"), Some(1)).unwrap();
        controller.submit_answer(&id("S2"), Some(1)).unwrap();

        let dispatches = controller.kick(&id("T"), &id("S2")).unwrap();
        assert_eq!(kinds(&dispatches), vec!["kicked", "participantsUpdate", "resultsUpdate"]);
        assert_eq!(last_counts(&dispatches), vec![0, 1]);
        assert!(matches!(&dispatches[0], Dispatch::Connection { connection, .. } if connection == &id("S2")));

        assert!(room(&controller, "MATH1").participant(&id("S2")).is_none());

        // A stale submission from the kicked connection is dropped
        let err = controller.submit_answer(&id("S2"), Some(0)).unwrap_err();
        assert!(matches!(err, PollError::UnknownConnection(_)));
        let question = room(&controller, "MATH1").current_question().unwrap();
        assert_eq!(question.counts(), vec![0, 1]);
    }

    #[test]
    fn test_kick_guards() {
        let mut controller = math_class();
        assert!(matches!(controller.kick(&id("S1"), &id("S2")), Err(PollError::NotTeacher(_))));
        assert!(matches!(controller.kick(&id("T"), &id("T")), Err(PollError::CannotKickSelf)));
        assert!(matches!(
            controller.kick(&id("T"), &id("ghost")),
            Err(PollError::NotParticipant(_))
        ));
    }

    #[test]
    fn test_chat_relays_sender_details() {
        let mut controller = math_class();
        let dispatches = controller.chat(&id("S1"), "  hello  ").unwrap();

        match dispatches[0].message() {
            ServerMessage::ChatMessage { from, role, text, .. } => {
                assert_eq!(from, "Ann");
                assert_eq!(*role, Role::Student);
                assert_eq!(text, "hello");
            }
            other => panic!("unexpected message: {:?}", other),
        }

        assert!(matches!(controller.chat(&id("S1"), "   "), Err(PollError::EmptyMessage)));
        assert!(matches!(controller.chat(&id("ghost"), "hi"), Err(PollError::UnknownConnection(_))));
    }

    #[test]
    fn test_invalid_question_is_rejected() {
        let mut controller = math_class();
        let draft = QuestionDraft {
            text: "lonely".to_string(),
            options: vec![AnswerOption::new("only", true)],
            duration: 0,
        };
        assert!(matches!(
            controller.create_question(&id("T"), draft),
            Err(PollError::InvalidQuestion(_))
        ));
        assert!(room(&controller, "MATH1").current_question().is_none());
    }

    #[test]
    fn test_joining_another_room_leaves_the_first() {
        let mut controller = math_class();
        let dispatches = controller.join(&id("S1"), "physics", Role::Student, "Ann".into()).unwrap();

        // Roster update for the old room comes first
        assert!(matches!(&dispatches[0], Dispatch::Room { room, .. } if room.as_str() == "MATH1"));
        assert!(room(&controller, "MATH1").participant(&id("S1")).is_none());
        assert!(room(&controller, "PHYSICS").participant(&id("S1")).is_some());
        assert_eq!(
            controller.registry().find_by_participant(&id("S1")).map(RoomCode::as_str),
            Some("PHYSICS")
        );
    }

    #[test]
    fn test_teacher_rejoining_as_student_releases_seat() {
        let mut controller = math_class();
        controller.create_question(&id("T"), two_plus_two()).unwrap();

        let dispatches = controller.join(&id("T"), "math1", Role::Student, "Now a student".into()).unwrap();
        assert_eq!(kinds(&dispatches), vec!["teacherLeft", "joined", "participantsUpdate"]);

        let room = room(&controller, "MATH1");
        assert!(room.teacher_id().is_none());
        assert!(room.current_question().is_none());
        assert_eq!(room.participant(&id("T")).unwrap().role, Role::Student);
    }

    #[test]
    fn test_expire_only_closes_the_same_question() {
        let mut controller = math_class();
        let code = RoomCode::normalize("math1");
        let dispatches = controller.create_question(&id("T"), two_plus_two()).unwrap();
        let ServerMessage::NewQuestion(first) = dispatches[0].message().clone() else {
            panic!("expected newQuestion");
        };
        controller.create_question(&id("T"), two_plus_two()).unwrap();

        assert!(matches!(
            controller.expire_question(&code, first.id),
            Err(PollError::StaleQuestion(_))
        ));
        assert!(room(&controller, "MATH1").current_question().is_some());

        let current = room(&controller, "MATH1").current_question().unwrap().id;
        let dispatches = controller.expire_question(&code, current).unwrap();
        assert_eq!(kinds(&dispatches), vec!["questionEnded"]);
        assert_eq!(room(&controller, "MATH1").history().len(), 1);
    }

    #[test]
    fn test_handle_routes_client_messages() {
        let mut controller = SessionController::new();
        let join = ClientMessage::JoinRoom {
            room_code: "z".to_string(),
            role: Role::Teacher,
            name: "T".to_string(),
        };
        controller.handle(&id("T"), join).unwrap();
        controller
            .handle(&id("T"), ClientMessage::CreateQuestion(two_plus_two()))
            .unwrap();
        let dispatches = controller.handle(&id("T"), ClientMessage::EndQuestion).unwrap();
        assert_eq!(kinds(&dispatches), vec!["questionEnded"]);
    }

    #[test]
    fn test_whole_float_answer_counts_as_integer() {
        let mut controller = math_class();
        controller.create_question(&id("T"), two_plus_two()).unwrap();

        let message: ClientMessage = serde_json::from_str(r#"{"type":"submitAnswer","optionIndex":1.0}"#).unwrap();
        let dispatches = controller.handle(&id("S1"), message).unwrap();
        assert_eq!(last_counts(&dispatches), vec![0, 1]);

        let message: ClientMessage = serde_json::from_str(r#"{"type":"submitAnswer","optionIndex":0.5}"#).unwrap();
        let dispatches = controller.handle(&id("S2"), message).unwrap();
        assert_eq!(last_counts(&dispatches), vec![0, 1]);
    }
}
