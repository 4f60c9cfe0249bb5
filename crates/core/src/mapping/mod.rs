use serde::{Deserialize, Serialize};

use crate::{ControlVector, MetricKey};

pub const TEMPO_MIN: u32 = 60;
pub const TEMPO_MAX: u32 = 120;

/// Full parameter set pushed to the generative session every tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParameters {
    pub tempo: u32,
    pub density: f32,
    pub brightness: f32,
    pub guidance: f32,
    pub temperature: f32,
    pub top_k: u32,
    pub mute_drums: bool,
    pub mute_bass: bool,
}

/// Descriptive steering text with a relative weight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightedPrompt {
    pub text: String,
    pub weight: f32,
}

impl WeightedPrompt {
    fn new(text: &str, weight: f32) -> Self {
        Self {
            text: text.to_string(),
            weight,
        }
    }
}

/// Everything derived from one fused control vector.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationPlan {
    pub parameters: GenerationParameters,
    pub prompts: Vec<WeightedPrompt>,
}

impl GenerationPlan {
    pub fn tempo(&self) -> u32 {
        self.parameters.tempo
    }

    /// Maps a fused control vector to generation parameters and prompts.
    pub fn from_controls(fused: &ControlVector) -> Self {
        let smile = fused.get(MetricKey::Smile);
        let tension = fused.get(MetricKey::Tension);
        let arm = fused.get(MetricKey::ArmRaise);
        let hand_open = fused.get(MetricKey::HandOpen);
        let pinch = fused.get(MetricKey::Pinch);
        let shoulder = fused.get(MetricKey::ShoulderWidth);

        let tempo = rounded(68.0 + 12.0 * arm + 40.0 * tension, TEMPO_MIN, TEMPO_MAX);
        let drums = tension > 0.75 && arm > 0.75;

        let parameters = GenerationParameters {
            tempo,
            density: (0.06 + 0.16 * hand_open + 0.06 * tension).clamp(0.05, 0.30),
            brightness: (0.18 + 0.72 * smile).clamp(0.12, 0.90),
            guidance: (2.0 + 0.6 * (1.0 - tension) + 0.2 * pinch).clamp(1.8, 2.6),
            temperature: (1.0 + 0.6 * tension).clamp(0.95, 1.7),
            top_k: rounded(30.0 + 35.0 * tension, 25, 70),
            mute_drums: !drums,
            mute_bass: true,
        };

        let base = if drums {
            "ambient underscore, sparse, long notes, leave space, no bass"
        } else {
            "ambient underscore, single instrument, sparse, long notes, leave space, no drums, no percussion, no bass"
        };
        let mood = if smile >= 0.55 {
            "bright, warm, major, open, uplifting, clear tone"
        } else {
            "darker, minor, restrained, gentle dissonance, emotional"
        };
        let space = if shoulder > 0.5 {
            "wide spacious reverb"
        } else {
            "dry close intimate"
        };

        Self {
            parameters,
            prompts: vec![
                WeightedPrompt::new(base, 1.6),
                WeightedPrompt::new(mood, 0.9),
                WeightedPrompt::new(space, 0.3),
            ],
        }
    }
}

fn rounded(value: f32, min: u32, max: u32) -> u32 {
    (value.round().max(0.0) as u32).clamp(min, max)
}
