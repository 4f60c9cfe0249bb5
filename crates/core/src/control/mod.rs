use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Named control metrics a participant may report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MetricKey {
    Pinch,
    HandOpen,
    HandHeight,
    Smile,
    Tension,
    ShoulderWidth,
    ArmRaise,
}

impl MetricKey {
    pub const COUNT: usize = 7;

    pub const ALL: [MetricKey; Self::COUNT] = [
        MetricKey::Pinch,
        MetricKey::HandOpen,
        MetricKey::HandHeight,
        MetricKey::Smile,
        MetricKey::Tension,
        MetricKey::ShoulderWidth,
        MetricKey::ArmRaise,
    ];

    /// Wire name used in participant messages.
    pub fn as_str(self) -> &'static str {
        match self {
            MetricKey::Pinch => "pinch",
            MetricKey::HandOpen => "handOpen",
            MetricKey::HandHeight => "handHeight",
            MetricKey::Smile => "smile",
            MetricKey::Tension => "tension",
            MetricKey::ShoulderWidth => "shoulderWidth",
            MetricKey::ArmRaise => "armRaise",
        }
    }
}

/// Metric values clamped to `[0, 1]`. Keys that were never set read as zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ControlVector {
    values: BTreeMap<MetricKey, f32>,
}

impl ControlVector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Vector with every known key present and set to zero.
    pub fn zeroed() -> Self {
        Self {
            values: MetricKey::ALL.iter().map(|key| (*key, 0.0)).collect(),
        }
    }

    pub fn get(&self, key: MetricKey) -> f32 {
        self.values.get(&key).copied().unwrap_or(0.0)
    }

    pub fn contains(&self, key: MetricKey) -> bool {
        self.values.contains_key(&key)
    }

    /// Stores `value` clamped to `[0, 1]`. NaN is ignored.
    pub fn set(&mut self, key: MetricKey, value: f32) {
        if value.is_nan() {
            return;
        }
        self.values.insert(key, value.clamp(0.0, 1.0));
    }

    pub fn with(mut self, key: MetricKey, value: f32) -> Self {
        self.set(key, value);
        self
    }

    /// Overwrites the keys present in `update`, leaving the others untouched.
    pub fn apply(&mut self, update: &ControlVector) {
        for (key, value) in &update.values {
            self.values.insert(*key, *value);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (MetricKey, f32)> + '_ {
        self.values.iter().map(|(key, value)| (*key, *value))
    }

    /// Builds a vector from a JSON object, keeping only known keys whose
    /// values parse as a number.
    pub fn from_json_object(object: &serde_json::Map<String, Value>) -> Self {
        let mut vector = Self::new();
        for key in MetricKey::ALL {
            if let Some(value) = object.get(key.as_str()).and_then(parse_metric) {
                vector.set(key, value);
            }
        }
        vector
    }
}

fn parse_metric(value: &Value) -> Option<f32> {
    let parsed = match value {
        Value::Number(number) => number.as_f64()?,
        Value::String(text) => text.trim().parse::<f64>().ok()?,
        Value::Bool(flag) => f64::from(u8::from(*flag)),
        _ => return None,
    };
    if parsed.is_nan() {
        None
    } else {
        Some(parsed.clamp(0.0, 1.0) as f32)
    }
}

/// Messages a participant sends over its connection.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    /// Control update carrying only the keys present in the message.
    Raw(ControlVector),
    Ping,
}

impl ClientMessage {
    /// Parses a text frame. Malformed JSON, unknown message types and raw
    /// updates with no usable metric yield `None`.
    pub fn parse(text: &str) -> Option<Self> {
        let value: Value = serde_json::from_str(text).ok()?;
        let object = value.as_object()?;
        match object.get("type").and_then(Value::as_str)? {
            "raw" => {
                let vector = ControlVector::from_json_object(object);
                (!vector.is_empty()).then_some(ClientMessage::Raw(vector))
            }
            "ping" => Some(ClientMessage::Ping),
            _ => None,
        }
    }
}

/// Text replies sent back to a participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    Pong,
}

impl ServerMessage {
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_clamps_known_metrics() {
        let message =
            ClientMessage::parse(r#"{"type":"raw","tension":1.7,"smile":"0.25","pinch":-3}"#)
                .unwrap();
        let ClientMessage::Raw(vector) = message else {
            panic!("expected raw update");
        };

        assert_eq!(vector.get(MetricKey::Tension), 1.0);
        assert_eq!(vector.get(MetricKey::Smile), 0.25);
        assert_eq!(vector.get(MetricKey::Pinch), 0.0);
        assert!(!vector.contains(MetricKey::ArmRaise));
    }

    #[test]
    fn drops_unknown_and_unparsable_values() {
        let message = ClientMessage::parse(
            r#"{"type":"raw","tension":"loud","mystery":0.5,"handOpen":null,"armRaise":0.4}"#,
        )
        .unwrap();
        let ClientMessage::Raw(vector) = message else {
            panic!("expected raw update");
        };

        assert_eq!(vector.iter().collect::<Vec<_>>(), vec![(MetricKey::ArmRaise, 0.4)]);
    }

    #[test]
    fn ignores_raw_update_without_metrics() {
        assert_eq!(ClientMessage::parse(r#"{"type":"raw","tension":"nan"}"#), None);
        assert_eq!(ClientMessage::parse(r#"{"type":"raw"}"#), None);
    }

    #[test]
    fn ignores_malformed_and_unknown_messages() {
        assert_eq!(ClientMessage::parse("not json"), None);
        assert_eq!(ClientMessage::parse("[1,2,3]"), None);
        assert_eq!(ClientMessage::parse(r#"{"type":"dance"}"#), None);
        assert_eq!(ClientMessage::parse(r#"{"tension":0.2}"#), None);
        assert_eq!(ClientMessage::parse(r#"{"type":"ping"}"#), Some(ClientMessage::Ping));
    }

    #[test]
    fn apply_keeps_keys_missing_from_update() {
        let mut current = ControlVector::new()
            .with(MetricKey::Tension, 0.8)
            .with(MetricKey::Smile, 0.3);
        current.apply(&ControlVector::new().with(MetricKey::Smile, 0.9));

        assert_eq!(current.get(MetricKey::Tension), 0.8);
        assert_eq!(current.get(MetricKey::Smile), 0.9);
    }

    #[test]
    fn pong_matches_wire_format() {
        assert_eq!(ServerMessage::Pong.to_json().unwrap(), r#"{"type":"pong"}"#);
    }
}
