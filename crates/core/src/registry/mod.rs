//! Process-wide table of rooms keyed by room id.

use std::{collections::HashMap, sync::Arc};

use parking_lot::Mutex;

use crate::{
    AppConfig, AudioChunk, BoundedChannel, ClientMessage, GenerativeEngine, Result, Room,
    RoomSnapshot, ServerMessage,
};

/// Creates rooms lazily on first join and tears them down on last leave.
/// Joins, leaves and lookups are serialized by one mutex.
#[derive(Clone)]
pub struct RoomRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    config: AppConfig,
    engine: Arc<dyn GenerativeEngine>,
    rooms: Mutex<HashMap<String, Arc<Room>>>,
}

impl RoomRegistry {
    /// Fails with [`MaestroError::InvalidConfig`](crate::MaestroError::InvalidConfig) when `config` does not
    /// validate.
    pub fn new(config: AppConfig, engine: Arc<dyn GenerativeEngine>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(RegistryInner {
                config,
                engine,
                rooms: Mutex::new(HashMap::new()),
            }),
        })
    }

    /// Returns the room, creating an empty one if needed.
    pub fn get_or_create(&self, room_id: &str) -> Arc<Room> {
        let mut rooms = self.inner.rooms.lock();
        self.get_or_create_locked(&mut rooms, room_id)
    }

    pub fn lookup(&self, room_id: &str) -> Option<Arc<Room>> {
        self.inner.rooms.lock().get(room_id).cloned()
    }

    pub fn room_count(&self) -> usize {
        self.inner.rooms.lock().len()
    }

    pub fn snapshots(&self) -> Vec<RoomSnapshot> {
        let rooms: Vec<_> = self.inner.rooms.lock().values().cloned().collect();
        let mut snapshots: Vec<_> = rooms.iter().map(|room| room.snapshot()).collect();
        snapshots.sort_by(|a, b| a.room_id.cmp(&b.room_id));
        snapshots
    }

    /// Registers a participant and starts the room's control loop if it is
    /// not running. Must be called from within a tokio runtime.
    pub fn join(&self, room_id: &str, participant_id: &str) -> ParticipantHandle {
        let (room, outbound) = {
            let mut rooms = self.inner.rooms.lock();
            let room = self.get_or_create_locked(&mut rooms, room_id);
            let outbound = room.insert_participant(participant_id);
            room.ensure_running();
            (room, outbound)
        };
        tracing::info!(room = %room_id, participant = %participant_id, "participant joined");

        ParticipantHandle {
            registry: self.clone(),
            room,
            participant_id: participant_id.to_string(),
            outbound,
        }
    }

    /// Removes a participant. The last one out tears the room down.
    fn leave(&self, room: &Arc<Room>, participant_id: &str, outbound: &Arc<BoundedChannel<AudioChunk>>) {
        let mut rooms = self.inner.rooms.lock();
        if !room.remove_participant(participant_id, outbound) {
            return;
        }
        tracing::info!(room = %room.id(), participant = %participant_id, "participant left");
        if !room.is_empty() {
            return;
        }

        room.shutdown();
        let registered = rooms
            .get(room.id())
            .is_some_and(|current| Arc::ptr_eq(current, room));
        if registered {
            rooms.remove(room.id());
        }
        tracing::info!(room = %room.id(), "room torn down after last participant left");
    }

    fn get_or_create_locked(&self, rooms: &mut HashMap<String, Arc<Room>>, room_id: &str) -> Arc<Room> {
        rooms
            .entry(room_id.to_string())
            .or_insert_with(|| {
                tracing::info!(room = %room_id, "creating room");
                Room::new(room_id, &self.inner.config, self.inner.engine.clone())
            })
            .clone()
    }
}

impl std::fmt::Debug for RoomRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomRegistry")
            .field("rooms", &self.room_count())
            .finish()
    }
}

/// A participant's membership in a room. Dropping the handle leaves the room.
pub struct ParticipantHandle {
    registry: RoomRegistry,
    room: Arc<Room>,
    participant_id: String,
    outbound: Arc<BoundedChannel<AudioChunk>>,
}

impl ParticipantHandle {
    pub fn room(&self) -> &Arc<Room> {
        &self.room
    }

    pub fn participant_id(&self) -> &str {
        &self.participant_id
    }

    /// Applies a text frame from the participant. Malformed or unknown
    /// frames are ignored. Returns the reply to send, if any.
    pub fn handle_text(&self, text: &str) -> Option<ServerMessage> {
        let message = ClientMessage::parse(text)?;
        self.room.handle_message(&self.participant_id, &message)
    }

    /// Waits for the next audio chunk for this participant. Returns `None`
    /// once the participant has been removed or replaced.
    pub async fn next_audio(&self) -> Option<AudioChunk> {
        self.outbound.pop().await
    }

    pub fn try_next_audio(&self) -> Option<AudioChunk> {
        self.outbound.try_pop()
    }

    pub fn leave(self) {
        drop(self);
    }
}

impl Drop for ParticipantHandle {
    fn drop(&mut self) {
        self.registry
            .leave(&self.room, &self.participant_id, &self.outbound);
    }
}

impl std::fmt::Debug for ParticipantHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParticipantHandle")
            .field("room", &self.room.id())
            .field("participant", &self.participant_id)
            .finish()
    }
}
