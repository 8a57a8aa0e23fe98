use std::collections::HashMap;

use super::room::{ConnectionId, Participant, Room, RoomCode};

/// Storage behind the registry. Rooms live for the whole process in the
/// in-memory store; another store can add eviction without touching the
/// controller.
pub trait RoomStore: Send {
    fn get_or_create(&mut self, code: &RoomCode) -> &mut Room;
    fn get(&self, code: &RoomCode) -> Option<&Room>;
    fn get_mut(&mut self, code: &RoomCode) -> Option<&mut Room>;
    fn remove(&mut self, code: &RoomCode) -> Option<Room>;
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Default)]
pub struct MemoryRoomStore {
    rooms: HashMap<RoomCode, Room>,
}

impl RoomStore for MemoryRoomStore {
    fn get_or_create(&mut self, code: &RoomCode) -> &mut Room {
        self.rooms.entry(code.clone()).or_insert_with(|| {
            tracing::info!(room = %code, "Room created");
            Room::new(code.clone())
        })
    }

    fn get(&self, code: &RoomCode) -> Option<&Room> {
        self.rooms.get(code)
    }

    fn get_mut(&mut self, code: &RoomCode) -> Option<&mut Room> {
        self.rooms.get_mut(code)
    }

    fn remove(&mut self, code: &RoomCode) -> Option<Room> {
        self.rooms.remove(code)
    }

    fn len(&self) -> usize {
        self.rooms.len()
    }
}

/// Maps room codes to rooms and keeps a connection -> room index in step
/// with every roster change, so a connection is in at most one room.
pub struct RoomRegistry<S: RoomStore = MemoryRoomStore> {
    store: S,
    memberships: HashMap<ConnectionId, RoomCode>,
}

impl RoomRegistry<MemoryRoomStore> {
    pub fn new() -> Self {
        Self::with_store(MemoryRoomStore::default())
    }
}

impl Default for RoomRegistry<MemoryRoomStore> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: RoomStore> RoomRegistry<S> {
    pub fn with_store(store: S) -> Self {
        Self {
            store,
            memberships: HashMap::new(),
        }
    }

    pub fn get_or_create(&mut self, code: &RoomCode) -> &mut Room {
        self.store.get_or_create(code)
    }

    pub fn room(&self, code: &RoomCode) -> Option<&Room> {
        self.store.get(code)
    }

    pub fn room_mut(&mut self, code: &RoomCode) -> Option<&mut Room> {
        self.store.get_mut(code)
    }

    /// The room a connection currently belongs to
    pub fn find_by_participant(&self, id: &ConnectionId) -> Option<&RoomCode> {
        self.memberships.get(id)
    }

    pub fn find_room(&self, id: &ConnectionId) -> Option<&Room> {
        let code = self.memberships.get(id)?;
        self.store.get(code)
    }

    pub fn find_room_mut(&mut self, id: &ConnectionId) -> Option<&mut Room> {
        let code = self.memberships.get(id)?;
        self.store.get_mut(code)
    }

    /// Add (or update) a participant. The caller must have evicted the
    /// connection from any other room first.
    pub fn admit(&mut self, id: ConnectionId, code: &RoomCode, participant: Participant) -> &mut Room {
        debug_assert!(
            self.memberships.get(&id).map_or(true, |current| current == code),
            "connection admitted to a second room"
        );

        self.memberships.insert(id.clone(), code.clone());
        let room = self.store.get_or_create(code);
        room.insert_participant(id, participant);
        room
    }

    /// Remove a connection from its room, returning where it was and as whom
    pub fn evict(&mut self, id: &ConnectionId) -> Option<(RoomCode, Participant)> {
        let code = self.memberships.remove(id)?;
        let participant = self.store.get_mut(&code)?.remove_participant(id)?;
        Some((code, participant))
    }

    /// Tear a room down and forget every membership pointing at it
    pub fn remove(&mut self, code: &RoomCode) -> Option<Room> {
        let room = self.store.remove(code)?;
        self.memberships.retain(|_, member_of| member_of != code);
        Some(room)
    }

    pub fn room_count(&self) -> usize {
        self.store.len()
    }

    pub fn connection_count(&self) -> usize {
        self.memberships.len()
    }
}
