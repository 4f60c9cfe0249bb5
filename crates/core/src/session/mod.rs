//! Generative engine seam and the per-room session lifecycle.
//!
//! A room owns exactly one [`SessionManager`]. The manager opens at most one
//! session at a time, publishes its state through a watch channel that
//! doubles as the readiness signal, and runs the receive loop that moves
//! produced audio into the room's inbound channel.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::{sync::watch, task::JoinHandle};

use crate::{
    AudioChunk, BoundedChannel, GenerationParameters, MaestroError, Result, SessionConfig,
    StopSignal, WeightedPrompt,
};

/// Parameters for opening a session.
#[derive(Debug, Clone)]
pub struct ConnectRequest {
    pub model: String,
    pub api_key: Option<String>,
}

/// One message produced by a live session. May carry no audio at all.
#[derive(Debug, Clone, Default)]
pub struct SessionMessage {
    pub audio_chunks: Vec<AudioChunk>,
}

/// Factory for generative sessions.
#[async_trait]
pub trait GenerativeEngine: Send + Sync {
    async fn connect(&self, request: &ConnectRequest) -> Result<Box<dyn GenerativeSession>>;
}

/// A live generative session. Every operation may fail; callers log and
/// carry on.
#[async_trait]
pub trait GenerativeSession: Send + Sync {
    /// Waits for the next produced message. `Ok(None)` means the session
    /// stream has ended.
    async fn next_message(&self) -> Result<Option<SessionMessage>>;
    async fn set_parameters(&self, parameters: &GenerationParameters) -> Result<()>;
    async fn set_prompts(&self, prompts: &[WeightedPrompt]) -> Result<()>;
    async fn start_playback(&self) -> Result<()>;
    async fn reset_context(&self) -> Result<()>;
    async fn close(&self) -> Result<()>;
}

pub type SessionHandle = Arc<dyn GenerativeSession>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Absent,
    Connecting,
    Live,
    Closing,
}

struct Shared {
    room_id: String,
    inbound: Arc<BoundedChannel<AudioChunk>>,
    stop: StopSignal,
    state: watch::Sender<SessionState>,
    slot: Mutex<Slot>,
}

#[derive(Default)]
struct Slot {
    handle: Option<SessionHandle>,
    task: Option<JoinHandle<()>>,
}

impl Shared {
    fn mark_absent(&self) {
        self.slot.lock().handle = None;
        self.state.send_replace(SessionState::Absent);
    }
}

/// Owns the single generative session of a room.
pub struct SessionManager {
    engine: Arc<dyn GenerativeEngine>,
    config: SessionConfig,
    shared: Arc<Shared>,
}

impl SessionManager {
    pub fn new(
        room_id: impl Into<String>,
        engine: Arc<dyn GenerativeEngine>,
        config: SessionConfig,
        inbound: Arc<BoundedChannel<AudioChunk>>,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Absent);
        Self {
            engine,
            config,
            shared: Arc::new(Shared {
                room_id: room_id.into(),
                inbound,
                stop: StopSignal::new(),
                state,
                slot: Mutex::new(Slot::default()),
            }),
        }
    }

    pub fn state(&self) -> SessionState {
        let slot = self.shared.slot.lock();
        if slot.task.as_ref().map_or(true, JoinHandle::is_finished) {
            // A task that died without cleaning up still leaves the session absent.
            return SessionState::Absent;
        }
        *self.shared.state.borrow()
    }

    /// The live session, if any.
    pub fn current(&self) -> Option<SessionHandle> {
        let slot = self.shared.slot.lock();
        let alive = slot.task.as_ref().is_some_and(|task| !task.is_finished());
        if alive {
            slot.handle.clone()
        } else {
            None
        }
    }

    /// Returns the live session, starting a connect attempt when none is in
    /// flight. Concurrent callers share one attempt.
    pub async fn ensure(&self) -> Result<SessionHandle> {
        let mut ready = {
            let mut slot = self.shared.slot.lock();
            let running = slot.task.as_ref().is_some_and(|task| !task.is_finished());
            if running {
                if let Some(handle) = slot.handle.clone() {
                    return Ok(handle);
                }
            } else {
                if self.shared.stop.is_triggered() {
                    return Err(MaestroError::SessionStopped);
                }
                let request = self.connect_request()?;
                slot.handle = None;
                self.shared.state.send_replace(SessionState::Connecting);
                slot.task = Some(tokio::spawn(run_session(
                    self.shared.clone(),
                    self.engine.clone(),
                    request,
                )));
            }
            self.shared.state.subscribe()
        };

        let settled = ready
            .wait_for(|state| *state != SessionState::Connecting)
            .await
            .map(|state| *state)
            .map_err(|_| MaestroError::SessionStopped)?;

        match self.current() {
            Some(handle) if settled == SessionState::Live => Ok(handle),
            _ if self.shared.stop.is_triggered() => Err(MaestroError::SessionStopped),
            _ => Err(MaestroError::SessionUnavailable(format!(
                "connect attempt for room `{}` did not produce a live session",
                self.shared.room_id
            ))),
        }
    }

    /// Stops the receive loop, cancels any connect attempt and drops the
    /// session. The manager cannot reconnect afterwards.
    pub fn shutdown(&self) {
        self.shared.stop.trigger();
        let (task, handle) = {
            let mut slot = self.shared.slot.lock();
            (slot.task.take(), slot.handle.take())
        };
        if let Some(task) = task {
            task.abort();
        }
        self.shared.state.send_replace(SessionState::Absent);

        if let Some(handle) = handle {
            if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                let room_id = self.shared.room_id.clone();
                runtime.spawn(async move {
                    if let Err(error) = handle.close().await {
                        tracing::debug!(room = %room_id, %error, "closing session failed");
                    }
                });
            }
        }
    }

    fn connect_request(&self) -> Result<ConnectRequest> {
        let api_key = match &self.config.api_key_env {
            Some(var) => match std::env::var(var) {
                Ok(key) if !key.trim().is_empty() => Some(key),
                _ => return Err(MaestroError::MissingCredential { var: var.clone() }),
            },
            None => None,
        };
        Ok(ConnectRequest {
            model: self.config.model.clone(),
            api_key,
        })
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        if let Some(task) = self.shared.slot.lock().task.take() {
            task.abort();
        }
    }
}

async fn run_session(shared: Arc<Shared>, engine: Arc<dyn GenerativeEngine>, request: ConnectRequest) {
    let room_id = shared.room_id.clone();
    tracing::info!(room = %room_id, model = %request.model, "connecting generative session");

    let session: SessionHandle = match engine.connect(&request).await {
        Ok(session) => Arc::from(session),
        Err(error) => {
            tracing::warn!(room = %room_id, %error, "generative session connect failed");
            shared.mark_absent();
            return;
        }
    };

    let published = {
        let mut slot = shared.slot.lock();
        if shared.stop.is_triggered() {
            false
        } else {
            slot.handle = Some(session.clone());
            shared.state.send_replace(SessionState::Live);
            true
        }
    };
    if !published {
        if let Err(error) = session.close().await {
            tracing::debug!(room = %room_id, %error, "closing session after stop failed");
        }
        return;
    }
    tracing::info!(room = %room_id, "generative session live");

    match receive_audio(&shared, session.as_ref()).await {
        Ok(()) => tracing::info!(room = %room_id, "generative session ended"),
        Err(error) => tracing::error!(room = %room_id, %error, "generative session crashed"),
    }

    shared.slot.lock().handle = None;
    shared.state.send_replace(SessionState::Closing);
    if let Err(error) = session.close().await {
        tracing::debug!(room = %room_id, %error, "closing session failed");
    }
    shared.mark_absent();
}

async fn receive_audio(shared: &Shared, session: &dyn GenerativeSession) -> Result<()> {
    loop {
        let message = tokio::select! {
            _ = shared.stop.triggered() => return Ok(()),
            message = session.next_message() => message?,
        };
        let Some(message) = message else {
            return Ok(());
        };
        for chunk in message.audio_chunks {
            if chunk.is_empty() {
                continue;
            }
            if shared.inbound.push(chunk).is_some() {
                tracing::trace!(room = %shared.room_id, "inbound audio full, dropped oldest chunk");
            }
        }
        tokio::task::yield_now().await;
    }
}
