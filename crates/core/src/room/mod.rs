//! Rooms: participant bookkeeping, shared fused state and task ownership.

mod control_loop;

use std::{collections::HashMap, sync::Arc};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::{task::JoinHandle, time::Instant};

use crate::{
    AppConfig, AudioChunk, BoundedChannel, ClientMessage, Contribution, ControlVector,
    GenerativeEngine, RecencyWeighting, RoomConfig, ServerMessage, SessionManager, SessionState,
    StopSignal,
};

pub use control_loop::TempoHysteresis;

/// Per-connection state owned by its room.
#[derive(Debug)]
pub(crate) struct Participant {
    id: String,
    latest_raw: ControlVector,
    last_activity: Instant,
    outbound: Arc<BoundedChannel<AudioChunk>>,
}

impl Participant {
    fn new(id: impl Into<String>, outbound_capacity: usize, now: Instant) -> Self {
        Self {
            id: id.into(),
            latest_raw: ControlVector::new(),
            last_activity: now,
            outbound: Arc::new(BoundedChannel::new(outbound_capacity)),
        }
    }

    /// Overwrites the reported keys and refreshes activity.
    fn apply_controls(&mut self, update: &ControlVector, now: Instant) {
        self.latest_raw.apply(update);
        self.last_activity = now;
    }

    fn touch(&mut self, now: Instant) {
        self.last_activity = now;
    }

    fn contribution(&self) -> Contribution<'_> {
        Contribution {
            controls: &self.latest_raw,
            last_activity: self.last_activity,
        }
    }
}

/// Fused state written only by the room's control loop.
#[derive(Debug, Clone)]
struct ControlState {
    merged: ControlVector,
    hysteresis: TempoHysteresis,
}

/// Point-in-time view of a room for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct RoomSnapshot {
    pub room_id: String,
    pub participants: usize,
    pub session: SessionState,
    pub fused: ControlVector,
    pub committed_tempo: u32,
}

pub struct Room {
    id: String,
    config: RoomConfig,
    weighting: RecencyWeighting,
    participants: Mutex<HashMap<String, Participant>>,
    control: Mutex<ControlState>,
    inbound: Arc<BoundedChannel<AudioChunk>>,
    session: SessionManager,
    stop: StopSignal,
    control_task: Mutex<Option<JoinHandle<()>>>,
}

impl Room {
    pub fn new(id: impl Into<String>, config: &AppConfig, engine: Arc<dyn GenerativeEngine>) -> Arc<Self> {
        let id = id.into();
        let inbound = Arc::new(BoundedChannel::new(config.room.inbound_queue_capacity));
        let session = SessionManager::new(
            id.clone(),
            engine,
            config.session.clone(),
            inbound.clone(),
        );
        Arc::new(Self {
            id,
            config: config.room.clone(),
            weighting: RecencyWeighting::from_config(&config.room),
            participants: Mutex::new(HashMap::new()),
            control: Mutex::new(ControlState {
                merged: ControlVector::zeroed(),
                hysteresis: TempoHysteresis::from_config(&config.room),
            }),
            inbound,
            session,
            stop: StopSignal::new(),
            control_task: Mutex::new(None),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    /// Current fused control vector.
    pub fn fused(&self) -> ControlVector {
        self.control.lock().merged.clone()
    }

    pub fn committed_tempo(&self) -> u32 {
        self.control.lock().hysteresis.committed_tempo()
    }

    pub fn participant_count(&self) -> usize {
        self.participants.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.lock().is_empty()
    }

    pub fn participant_ids(&self) -> Vec<String> {
        self.participants.lock().keys().cloned().collect()
    }

    /// Registers a participant, replacing any earlier one with the same id.
    /// Returns its outbound channel.
    pub fn insert_participant(&self, participant_id: &str) -> Arc<BoundedChannel<AudioChunk>> {
        let participant = Participant::new(
            participant_id,
            self.config.participant_queue_capacity,
            Instant::now(),
        );
        let outbound = participant.outbound.clone();
        let replaced = self
            .participants
            .lock()
            .insert(participant_id.to_string(), participant);
        if let Some(previous) = replaced {
            tracing::info!(room = %self.id, participant = %participant_id, "participant replaced by new connection");
            previous.outbound.close();
        }
        outbound
    }

    /// Removes the participant if `outbound` still identifies it. Returns
    /// whether anything was removed.
    pub fn remove_participant(&self, participant_id: &str, outbound: &Arc<BoundedChannel<AudioChunk>>) -> bool {
        let mut participants = self.participants.lock();
        let matches = participants
            .get(participant_id)
            .is_some_and(|participant| Arc::ptr_eq(&participant.outbound, outbound));
        if matches {
            if let Some(participant) = participants.remove(participant_id) {
                participant.outbound.close();
            }
        }
        matches
    }

    /// Applies a participant text frame. Returns the reply to send, if any.
    pub fn handle_message(&self, participant_id: &str, message: &ClientMessage) -> Option<ServerMessage> {
        let now = Instant::now();
        let mut participants = self.participants.lock();
        let participant = participants.get_mut(participant_id)?;
        match message {
            ClientMessage::Raw(update) => {
                participant.apply_controls(update, now);
                None
            }
            ClientMessage::Ping => {
                participant.touch(now);
                Some(ServerMessage::Pong)
            }
        }
    }

    /// Starts the control loop unless one is already running.
    pub fn ensure_running(self: &Arc<Self>) {
        let mut task = self.control_task.lock();
        let running = task.as_ref().is_some_and(|handle| !handle.is_finished());
        if running || self.stop.is_triggered() {
            return;
        }
        tracing::info!(room = %self.id, "starting control loop");
        *task = Some(tokio::spawn(control_loop::run(self.clone())));
    }

    pub fn is_running(&self) -> bool {
        self.control_task
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Cancels the control loop and the session, closing every channel.
    pub fn shutdown(&self) {
        self.stop.trigger();
        if let Some(task) = self.control_task.lock().take() {
            task.abort();
        }
        self.session.shutdown();
        self.inbound.close();
        for participant in self.participants.lock().values() {
            participant.outbound.close();
        }
        tracing::info!(room = %self.id, "room shut down");
    }

    pub fn snapshot(&self) -> RoomSnapshot {
        let control = self.control.lock().clone();
        RoomSnapshot {
            room_id: self.id.clone(),
            participants: self.participant_count(),
            session: self.session.state(),
            fused: control.merged,
            committed_tempo: control.hysteresis.committed_tempo(),
        }
    }

    fn fuse(&self, now: Instant) -> ControlVector {
        let previous = self.fused();
        let fused = {
            let participants = self.participants.lock();
            self.weighting
                .fuse(participants.values().map(Participant::contribution), now, &previous)
        };
        self.control.lock().merged = fused.clone();
        fused
    }

    /// Pushes `chunk` to every participant, dropping their oldest audio when
    /// full.
    fn broadcast(&self, chunk: &AudioChunk) {
        for participant in self.participants.lock().values() {
            if participant.outbound.push(chunk.clone()).is_some() {
                tracing::trace!(room = %self.id, participant = %participant.id, "outbound audio full, dropped oldest chunk");
            }
        }
    }
}

impl std::fmt::Debug for Room {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Room").field("id", &self.id).finish()
    }
}
