use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityKey(String);

impl EntityKey {
    pub const DEFAULT: &'static str = "default";

    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn default_key() -> Self {
        Self(Self::DEFAULT.to_string())
    }

    /// Blank or missing ids fold into the default sentinel.
    pub fn from_optional(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some(id) if !id.is_empty() => Self(id.to_string()),
            _ => Self::default_key(),
        }
    }

    pub fn is_default(&self) -> bool {
        self.0 == Self::DEFAULT
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_query(&self) -> Option<&str> {
        if self.is_default() {
            None
        } else {
            Some(&self.0)
        }
    }
}

impl Default for EntityKey {
    fn default() -> Self {
        Self::default_key()
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalPhase {
    Green,
    Yellow,
    Red,
    RedYellow,
}

impl SignalPhase {
    pub fn label(self) -> &'static str {
        match self {
            SignalPhase::Green => "green",
            SignalPhase::Yellow => "yellow",
            SignalPhase::Red => "red",
            SignalPhase::RedYellow => "red_yellow",
        }
    }

    pub fn shows_red(self) -> bool {
        matches!(self, SignalPhase::Red | SignalPhase::RedYellow)
    }

    pub fn shows_yellow(self) -> bool {
        matches!(self, SignalPhase::Yellow | SignalPhase::RedYellow)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaneState {
    pub id: String,
    pub state: SignalPhase,
    #[serde(default)]
    pub last_change_at: Option<i64>,
    #[serde(default)]
    pub last_vehicle_at: Option<i64>,
    #[serde(default)]
    pub last_sample_at: Option<i64>,
    #[serde(default)]
    pub last_distance_cm: Option<f64>,
    #[serde(default)]
    pub is_occupied: bool,
    #[serde(default)]
    pub last_cleared_at: Option<i64>,
    #[serde(default)]
    pub waiting: bool,
    #[serde(default)]
    pub cycles_completed: u64,
    #[serde(default)]
    pub red_since: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub lanes: Vec<LaneState>,
    #[serde(default)]
    pub queue: Vec<String>,
    #[serde(default)]
    pub config: SignalConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_connected: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub esp32_connected: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intersection_id: Option<String>,
}

impl Snapshot {
    pub fn entity_key(&self) -> EntityKey {
        EntityKey::from_optional(self.intersection_id.as_deref())
    }
}

/// Upstream producers disagree on key casing, so the raw bag is normalised
/// here and only the canonical field is exposed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(
    from = "BTreeMap<String, serde_json::Value>",
    into = "BTreeMap<String, serde_json::Value>"
)]
pub struct SignalConfig {
    pub max_red_ms: Option<u64>,
    pub extra: BTreeMap<String, serde_json::Value>,
}

const MAX_RED_KEYS: [&str; 2] = ["maxRedMs", "max_red_ms"];

impl SignalConfig {
    pub fn max_red_ms_or_zero(&self) -> u64 {
        self.max_red_ms.unwrap_or(0)
    }
}

impl From<BTreeMap<String, serde_json::Value>> for SignalConfig {
    fn from(mut raw: BTreeMap<String, serde_json::Value>) -> Self {
        let mut max_red_ms = None;
        for key in MAX_RED_KEYS {
            if let Some(value) = raw.remove(key) {
                if max_red_ms.is_none() {
                    max_red_ms = threshold_ms(&value);
                }
            }
        }
        Self {
            max_red_ms,
            extra: raw,
        }
    }
}

impl From<SignalConfig> for BTreeMap<String, serde_json::Value> {
    fn from(config: SignalConfig) -> Self {
        let mut out = config.extra;
        if let Some(ms) = config.max_red_ms {
            out.insert(MAX_RED_KEYS[0].to_string(), ms.into());
        }
        out
    }
}

fn threshold_ms(value: &serde_json::Value) -> Option<u64> {
    match value {
        serde_json::Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|v| *v >= 0.0).map(|v| v as u64)),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok().filter(|v| *v >= 0.0).map(|v| v as u64),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_backend_payload_with_red_yellow_phase() {
        let payload = json!({
            "timestamp": 1_700_000_000_000_i64,
            "lanes": [{
                "id": "north",
                "state": "red_yellow",
                "lastChangeAt": null,
                "lastVehicleAt": 1_699_999_999_000_i64,
                "lastSampleAt": null,
                "lastDistanceCm": 12.5,
                "isOccupied": true,
                "lastClearedAt": null,
                "waiting": true,
                "cyclesCompleted": 4,
                "redSince": 1_699_999_990_000_i64
            }],
            "queue": ["north"],
            "config": {"max_red_ms": 30000, "mode": "auto"},
            "databaseConnected": true,
            "esp32Connected": false,
            "intersectionId": "A"
        });

        let snapshot: Snapshot = serde_json::from_value(payload).expect("decode");

        assert_eq!(snapshot.lanes[0].state, SignalPhase::RedYellow);
        assert_ne!(snapshot.lanes[0].state, SignalPhase::Red);
        assert_eq!(snapshot.config.max_red_ms, Some(30_000));
        assert_eq!(snapshot.config.extra.get("mode"), Some(&json!("auto")));
        assert_eq!(snapshot.entity_key(), EntityKey::new("A"));
        assert_eq!(snapshot.esp32_connected, Some(false));
    }

    #[test]
    fn camel_case_threshold_wins_and_serializes_canonically() {
        let raw: BTreeMap<String, serde_json::Value> = serde_json::from_value(json!({
            "maxRedMs": 10000,
            "max_red_ms": 99999
        }))
        .expect("raw map");

        let config = SignalConfig::from(raw);
        let back: BTreeMap<String, serde_json::Value> = config.clone().into();

        assert_eq!(config.max_red_ms, Some(10_000));
        assert_eq!(back.len(), 1);
        assert_eq!(back.get("maxRedMs"), Some(&json!(10000)));
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let snapshot: Snapshot = serde_json::from_str("{}").expect("decode");

        assert_eq!(snapshot.timestamp, 0);
        assert!(snapshot.lanes.is_empty());
        assert_eq!(snapshot.config.max_red_ms_or_zero(), 0);
        assert!(snapshot.entity_key().is_default());
    }

    #[test]
    fn blank_intersection_id_maps_to_default_key() {
        assert!(EntityKey::from_optional(Some("  ")).is_default());
        assert!(EntityKey::from_optional(None).is_default());
        assert_eq!(EntityKey::default_key().as_query(), None);
        assert_eq!(EntityKey::new("B").as_query(), Some("B"));
    }
}
