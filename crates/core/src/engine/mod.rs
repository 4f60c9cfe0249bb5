//! In-process generative engine producing a steady sine tone.
//!
//! Lets the bridge run end to end without an external service: pitch follows
//! the tempo parameter and loudness follows density.

use std::f32::consts::TAU;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::{Interval, MissedTickBehavior};

use crate::{
    mapping::TEMPO_MIN, ConnectRequest, GenerationParameters, GenerativeEngine,
    GenerativeSession, Result, SessionMessage, StopSignal, ToneConfig, WeightedPrompt,
};

const BASE_FREQUENCY_HZ: f32 = 110.0;
const DENSITY_CEILING: f32 = 0.30;

#[derive(Debug, Clone, Default)]
pub struct ToneEngine {
    config: ToneConfig,
}

impl ToneEngine {
    pub fn new(config: ToneConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl GenerativeEngine for ToneEngine {
    async fn connect(&self, request: &ConnectRequest) -> Result<Box<dyn GenerativeSession>> {
        tracing::debug!(model = %request.model, "opening tone session");
        Ok(Box::new(ToneSession::new(self.config.clone())))
    }
}

struct ToneSession {
    config: ToneConfig,
    voice: Mutex<Voice>,
    pacing: tokio::sync::Mutex<Interval>,
    closed: StopSignal,
}

#[derive(Debug)]
struct Voice {
    playing: bool,
    frequency_hz: f32,
    level: f32,
    phase: f32,
}

impl Voice {
    fn render(&mut self, samples: usize, sample_rate: u32) -> Vec<u8> {
        let phase_inc = TAU * self.frequency_hz / sample_rate as f32;
        let mut out = Vec::with_capacity(samples * 4);
        for _ in 0..samples {
            out.extend_from_slice(&(self.phase.sin() * self.level).to_le_bytes());
            self.phase += phase_inc;
            if self.phase > TAU {
                self.phase -= TAU;
            }
        }
        out
    }
}

impl ToneSession {
    fn new(config: ToneConfig) -> Self {
        let mut pacing = tokio::time::interval(config.frame_interval());
        pacing.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let voice = Voice {
            playing: false,
            frequency_hz: BASE_FREQUENCY_HZ,
            level: config.gain,
            phase: 0.0,
        };
        Self {
            config,
            voice: Mutex::new(voice),
            pacing: tokio::sync::Mutex::new(pacing),
            closed: StopSignal::new(),
        }
    }
}

#[async_trait]
impl GenerativeSession for ToneSession {
    async fn next_message(&self) -> Result<Option<SessionMessage>> {
        if self.closed.is_triggered() {
            return Ok(None);
        }
        tokio::select! {
            _ = self.closed.triggered() => return Ok(None),
            _ = async { self.pacing.lock().await.tick().await } => {}
        }

        let mut voice = self.voice.lock();
        if !voice.playing {
            return Ok(Some(SessionMessage::default()));
        }
        let frame = voice.render(self.config.samples_per_frame(), self.config.sample_rate);
        Ok(Some(SessionMessage {
            audio_chunks: vec![frame.into()],
        }))
    }

    async fn set_parameters(&self, parameters: &GenerationParameters) -> Result<()> {
        let octaves = parameters.tempo.saturating_sub(TEMPO_MIN) as f32 / 60.0;
        let mut voice = self.voice.lock();
        voice.frequency_hz = BASE_FREQUENCY_HZ * 2.0_f32.powf(octaves);
        voice.level = self.config.gain * (parameters.density / DENSITY_CEILING).clamp(0.0, 1.0);
        Ok(())
    }

    async fn set_prompts(&self, _prompts: &[WeightedPrompt]) -> Result<()> {
        Ok(())
    }

    async fn start_playback(&self) -> Result<()> {
        self.voice.lock().playing = true;
        Ok(())
    }

    async fn reset_context(&self) -> Result<()> {
        self.voice.lock().phase = 0.0;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.trigger();
        Ok(())
    }
}
