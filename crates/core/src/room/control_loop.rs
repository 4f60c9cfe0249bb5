use std::{sync::Arc, time::Duration};

use tokio::time::Instant;

use super::Room;
use crate::{GenerationPlan, GenerativeSession, RoomConfig, SessionHandle};

/// Gate for expensive context resets: the tempo must move by at least
/// `threshold` and `cooldown` must have passed since the last reset.
#[derive(Debug, Clone)]
pub struct TempoHysteresis {
    threshold: u32,
    cooldown: Duration,
    committed_tempo: u32,
    last_reset: Option<Instant>,
}

impl TempoHysteresis {
    pub fn new(threshold: u32, cooldown: Duration, initial_tempo: u32) -> Self {
        Self {
            threshold,
            cooldown,
            committed_tempo: initial_tempo,
            last_reset: None,
        }
    }

    pub fn from_config(config: &RoomConfig) -> Self {
        Self::new(
            config.tempo_reset_threshold,
            config.tempo_reset_cooldown(),
            config.initial_tempo,
        )
    }

    pub fn committed_tempo(&self) -> u32 {
        self.committed_tempo
    }

    pub fn last_reset(&self) -> Option<Instant> {
        self.last_reset
    }

    /// Whether a reset to `tempo` is due at `now`. Does not commit.
    pub fn should_reset(&self, tempo: u32, now: Instant) -> bool {
        if tempo.abs_diff(self.committed_tempo) < self.threshold {
            return false;
        }
        self.last_reset
            .map_or(true, |at| now.saturating_duration_since(at) >= self.cooldown)
    }

    /// Records that the session was reset to `tempo` at `now`.
    pub fn commit(&mut self, tempo: u32, now: Instant) {
        self.committed_tempo = tempo;
        self.last_reset = Some(now);
    }
}

pub(super) async fn run(room: Arc<Room>) {
    let interval = room.config.tick_interval();
    while !room.stop.is_triggered() {
        let tick_start = Instant::now();
        tick(&room, tick_start).await;

        match interval.checked_sub(tick_start.elapsed()) {
            Some(remaining) if !remaining.is_zero() => {
                tokio::select! {
                    _ = room.stop.triggered() => break,
                    _ = tokio::time::sleep(remaining) => {}
                }
            }
            _ => {
                tracing::debug!(room = %room.id, "control tick overran its interval");
                tokio::task::yield_now().await;
            }
        }
    }
    tracing::debug!(room = %room.id, "control loop stopped");
}

async fn tick(room: &Room, tick_start: Instant) {
    // A reconnect may wait out a slow connect, so fuse against the time it
    // finished.
    let (session, now) = match room.session.current() {
        Some(session) => (Some(session), tick_start),
        None => {
            let session = reconnect(room).await;
            (session, Instant::now())
        }
    };

    let fused = room.fuse(now);
    let plan = GenerationPlan::from_controls(&fused);

    if let Some(session) = session.as_deref() {
        push_plan(room, session, &plan).await;

        let tempo = plan.tempo();
        let due = room.control.lock().hysteresis.should_reset(tempo, now);
        if due {
            match session.reset_context().await {
                Ok(()) => {
                    room.control.lock().hysteresis.commit(tempo, now);
                    tracing::info!(room = %room.id, tempo, "context reset");
                }
                Err(error) => {
                    tracing::warn!(room = %room.id, tempo, %error, "context reset failed");
                }
            }
        }
    }

    for _ in 0..room.config.drain_limit {
        let Some(chunk) = room.inbound.try_pop() else {
            break;
        };
        room.broadcast(&chunk);
    }
}

/// Obtains a fresh session and resumes it from the room's current state.
async fn reconnect(room: &Room) -> Option<SessionHandle> {
    let session = match room.session.ensure().await {
        Ok(session) => session,
        Err(error) => {
            tracing::warn!(room = %room.id, %error, "no generative session this tick");
            return None;
        }
    };

    let plan = GenerationPlan::from_controls(&room.fused());
    push_plan(room, session.as_ref(), &plan).await;
    if let Err(error) = session.start_playback().await {
        tracing::warn!(room = %room.id, %error, "starting playback failed");
    }
    room.control
        .lock()
        .hysteresis
        .commit(plan.tempo(), Instant::now());
    Some(session)
}

async fn push_plan(room: &Room, session: &dyn GenerativeSession, plan: &GenerationPlan) {
    if let Err(error) = session.set_prompts(&plan.prompts).await {
        tracing::warn!(room = %room.id, %error, "pushing prompts failed");
    }
    if let Err(error) = session.set_parameters(&plan.parameters).await {
        tracing::warn!(room = %room.id, %error, "pushing parameters failed");
    }
}
