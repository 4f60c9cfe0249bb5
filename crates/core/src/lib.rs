//! Core library for Maestro, a multi-room bridge that fuses participants'
//! control signals into the parameters of a generative audio session and
//! fans the produced audio back out to everyone in the room.
//!
//! Each room runs one fixed-rate control loop and owns at most one session.
//! Audio moves through drop-oldest [`BoundedChannel`]s so that a slow
//! consumer never stalls the engine or the other participants.

use std::sync::Arc;

pub mod channel;
pub mod config;
pub mod control;
pub mod engine;
pub mod error;
pub mod fusion;
pub mod mapping;
pub mod registry;
pub mod room;
pub mod session;

pub use channel::{BoundedChannel, StopSignal};
pub use config::{AppConfig, RoomConfig, ServerConfig, SessionConfig, ToneConfig};
pub use control::{ClientMessage, ControlVector, MetricKey, ServerMessage};
pub use engine::ToneEngine;
pub use error::{MaestroError, Result};
pub use fusion::{Contribution, RecencyWeighting};
pub use mapping::{GenerationParameters, GenerationPlan, WeightedPrompt};
pub use registry::{ParticipantHandle, RoomRegistry};
pub use room::{Room, RoomSnapshot, TempoHysteresis};
pub use session::{
    ConnectRequest, GenerativeEngine, GenerativeSession, SessionHandle, SessionManager,
    SessionMessage, SessionState,
};

/// Opaque block of generated audio, shared between every recipient.
pub type AudioChunk = Arc<[u8]>;
