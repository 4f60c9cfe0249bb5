//! Recency-weighted fusion of participant control vectors.

use std::time::Duration;

use tokio::time::Instant;

use crate::{ControlVector, MetricKey, RoomConfig};

const WEIGHT_EPSILON: f32 = 1e-6;

/// Linear fall-off of a participant's influence with the age of its last
/// activity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecencyWeighting {
    pub full_weight_age: Duration,
    pub zero_weight_age: Duration,
}

impl Default for RecencyWeighting {
    fn default() -> Self {
        Self {
            full_weight_age: Duration::from_millis(500),
            zero_weight_age: Duration::from_secs(3),
        }
    }
}

impl RecencyWeighting {
    pub fn from_config(config: &RoomConfig) -> Self {
        Self {
            full_weight_age: Duration::from_secs_f32(config.full_weight_secs),
            zero_weight_age: Duration::from_secs_f32(config.zero_weight_secs),
        }
    }

    pub fn weight(&self, age: Duration) -> f32 {
        if age <= self.full_weight_age {
            return 1.0;
        }
        if age >= self.zero_weight_age {
            return 0.0;
        }
        let span = (self.zero_weight_age - self.full_weight_age).as_secs_f32();
        let into = (age - self.full_weight_age).as_secs_f32();
        (1.0 - into / span).clamp(0.0, 1.0)
    }

    /// Weighted average of every contribution with positive weight. When no
    /// contribution carries weight, `previous` is returned unchanged.
    pub fn fuse<'a, I>(&self, contributions: I, now: Instant, previous: &ControlVector) -> ControlVector
    where
        I: IntoIterator<Item = Contribution<'a>>,
    {
        let mut acc = [0.0_f32; MetricKey::COUNT];
        let mut total = 0.0_f32;

        for contribution in contributions {
            let age = now.saturating_duration_since(contribution.last_activity);
            let weight = self.weight(age);
            if weight <= 0.0 {
                continue;
            }
            for (slot, key) in acc.iter_mut().zip(MetricKey::ALL) {
                *slot += weight * contribution.controls.get(key);
            }
            total += weight;
        }

        if total <= WEIGHT_EPSILON {
            return previous.clone();
        }

        let mut fused = ControlVector::new();
        for (sum, key) in acc.into_iter().zip(MetricKey::ALL) {
            fused.set(key, sum / total);
        }
        fused
    }
}

/// One participant's latest controls and when it last showed activity.
#[derive(Debug, Clone, Copy)]
pub struct Contribution<'a> {
    pub controls: &'a ControlVector,
    pub last_activity: Instant,
}
