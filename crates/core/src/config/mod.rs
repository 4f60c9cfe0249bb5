use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{MaestroError, Result};

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub room: RoomConfig,
    pub session: SessionConfig,
    pub tone: ToneConfig,
}

impl AppConfig {
    /// Reads a JSON configuration file. Missing fields fall back to defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Serializes the configuration as pretty-printed JSON.
    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        self.room.validate()?;
        self.tone.validate()
    }
}

/// Network settings for the transport in the application crate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:5000".to_string(),
        }
    }
}

/// Per-room control loop, buffering and hysteresis settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomConfig {
    pub tick_hz: f32,
    pub participant_queue_capacity: usize,
    pub inbound_queue_capacity: usize,
    pub drain_limit: usize,
    pub tempo_reset_threshold: u32,
    pub tempo_reset_cooldown_secs: f32,
    pub initial_tempo: u32,
    /// Activity age up to which a participant carries full weight.
    pub full_weight_secs: f32,
    /// Activity age from which a participant carries no weight.
    pub zero_weight_secs: f32,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            tick_hz: 8.0,
            participant_queue_capacity: 10,
            inbound_queue_capacity: 200,
            drain_limit: 12,
            tempo_reset_threshold: 3,
            tempo_reset_cooldown_secs: 2.5,
            initial_tempo: 90,
            full_weight_secs: 0.5,
            zero_weight_secs: 3.0,
        }
    }
}

impl RoomConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f32(1.0 / self.tick_hz)
    }

    pub fn tempo_reset_cooldown(&self) -> Duration {
        Duration::from_secs_f32(self.tempo_reset_cooldown_secs)
    }

    fn validate(&self) -> Result<()> {
        let tick_ok = self.tick_hz.is_finite()
            && self.tick_hz > 0.0
            && Duration::try_from_secs_f32(1.0 / self.tick_hz).is_ok();
        if !tick_ok {
            return Err(MaestroError::InvalidConfig(format!(
                "tick_hz must be positive with a representable interval, got {}",
                self.tick_hz
            )));
        }
        if self.participant_queue_capacity == 0 || self.inbound_queue_capacity == 0 {
            return Err(MaestroError::InvalidConfig(
                "queue capacities must be at least one".to_string(),
            ));
        }
        if !is_duration_secs(self.tempo_reset_cooldown_secs) {
            return Err(MaestroError::InvalidConfig(
                "tempo_reset_cooldown_secs must be finite and non-negative".to_string(),
            ));
        }
        let window_ok = is_duration_secs(self.full_weight_secs)
            && is_duration_secs(self.zero_weight_secs)
            && self.zero_weight_secs > self.full_weight_secs;
        if !window_ok {
            return Err(MaestroError::InvalidConfig(format!(
                "zero_weight_secs ({}) must be finite and exceed full_weight_secs ({})",
                self.zero_weight_secs, self.full_weight_secs
            )));
        }
        Ok(())
    }
}

fn is_duration_secs(secs: f32) -> bool {
    Duration::try_from_secs_f32(secs).is_ok()
}

/// Settings handed to the generative engine when a session is opened.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub model: String,
    /// Environment variable holding the engine credential. `None` means the
    /// engine needs no credential.
    pub api_key_env: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            model: "models/lyria-realtime-exp".to_string(),
            api_key_env: None,
        }
    }
}

/// Settings for the in-process [`ToneEngine`](crate::ToneEngine).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToneConfig {
    pub sample_rate: u32,
    pub frame_ms: u32,
    pub gain: f32,
}

impl Default for ToneConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            frame_ms: 20,
            gain: 0.05,
        }
    }
}

impl ToneConfig {
    pub fn samples_per_frame(&self) -> usize {
        (self.sample_rate as usize * self.frame_ms as usize) / 1000
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(u64::from(self.frame_ms))
    }

    fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 || self.frame_ms == 0 {
            return Err(MaestroError::InvalidConfig(
                "tone sample_rate and frame_ms must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = AppConfig::default();
        config.validate().unwrap();
        assert_eq!(config.room.tick_interval(), Duration::from_millis(125));
        assert_eq!(config.tone.samples_per_frame(), 960);
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{"room": {"tick_hz": 4.0}, "server": {"bind": "0.0.0.0:9000"}}"#)
                .unwrap();
        assert_eq!(config.room.tick_hz, 4.0);
        assert_eq!(config.room.drain_limit, 12);
        assert_eq!(config.server.bind, "0.0.0.0:9000");
        assert_eq!(config.session.model, "models/lyria-realtime-exp");
    }

    #[test]
    fn rejects_inverted_recency_window() {
        let mut config = AppConfig::default();
        config.room.zero_weight_secs = 0.2;
        let err = config.validate().unwrap_err();
        assert!(format!("{err}").contains("zero_weight_secs"));
    }

    #[test]
    fn rejects_unbounded_recency_window() {
        let mut config = AppConfig::default();
        config.room.zero_weight_secs = f32::INFINITY;
        let err = config.validate().unwrap_err();
        assert!(format!("{err}").contains("zero_weight_secs"));

        config.room.zero_weight_secs = f32::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_tick_rate_without_finite_interval() {
        let mut config = AppConfig::default();
        config.room.tick_hz = f32::MIN_POSITIVE / 4.0;
        assert!(matches!(
            config.validate(),
            Err(MaestroError::InvalidConfig(_))
        ));
    }

    #[test]
    fn rejects_zero_tick_rate() {
        let mut config = AppConfig::default();
        config.room.tick_hz = 0.0;
        assert!(matches!(
            config.validate(),
            Err(MaestroError::InvalidConfig(_))
        ));
    }
}
