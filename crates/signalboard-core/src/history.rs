use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use chrono::DateTime;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::backend::decode_response;
use crate::config::SupabaseConfig;
use crate::error::ApiError;

const HOUR_MS: i64 = 60 * 60 * 1000;

pub const SENSOR_LANES: [(&str, &str); 4] = [
    ("sensor1", "north"),
    ("sensor2", "west"),
    ("sensor3", "south"),
    ("sensor4", "east"),
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrafficEventRow {
    pub id: String,
    pub device_id: Option<String>,
    pub intersection_id: Option<String>,
    pub sensors: Option<serde_json::Map<String, serde_json::Value>>,
    pub state_snapshot: Option<serde_json::Value>,
    pub evaluation: Option<serde_json::Value>,
    pub ip: Option<String>,
    pub received_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LaneDetections {
    pub lane: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryMetrics {
    pub total_events: u64,
    pub events_last_hour: u64,
    pub unique_devices: u64,
    pub detections_by_lane: Vec<LaneDetections>,
}

/// Summarises raw controller events. A reading at or under `threshold_cm`
/// counts as a detection for the sensor's lane.
pub fn compute_history_metrics(rows: &[TrafficEventRow], now_ms: i64, threshold_cm: f64) -> HistoryMetrics {
    let last_hour = now_ms.saturating_sub(HOUR_MS);
    let mut detections: BTreeMap<&str, u64> = SENSOR_LANES.iter().map(|(_, lane)| (*lane, 0)).collect();
    let mut devices = HashSet::new();
    let mut events_last_hour = 0;

    for row in rows {
        if let Some(device) = row.device_id.as_deref() {
            devices.insert(device);
        }

        if let Ok(received) = DateTime::parse_from_rfc3339(&row.received_at) {
            if received.timestamp_millis() >= last_hour {
                events_last_hour += 1;
            }
        }

        let Some(sensors) = &row.sensors else {
            continue;
        };
        for (sensor, lane) in SENSOR_LANES {
            let reading = sensors.get(sensor).and_then(|v| v.as_f64());
            if reading.is_some_and(|cm| cm <= threshold_cm) {
                *detections.entry(lane).or_insert(0) += 1;
            }
        }
    }

    HistoryMetrics {
        total_events: rows.len() as u64,
        events_last_hour,
        unique_devices: devices.len() as u64,
        detections_by_lane: SENSOR_LANES
            .iter()
            .map(|(_, lane)| LaneDetections {
                lane: lane.to_string(),
                count: detections.get(lane).copied().unwrap_or(0),
            })
            .collect(),
    }
}

pub struct SupabaseClient {
    http: Client,
    base: Url,
    anon_key: String,
    timeout: Duration,
}

impl SupabaseClient {
    pub fn new(config: &SupabaseConfig, timeout: Duration) -> Result<Self, ApiError> {
        let url = config.url.trim_end_matches('/');
        let base = Url::parse(url)
            .map_err(|err| ApiError::InvalidArgument(format!("supabase url {url}: {err}")))?;
        info!(supabase=%base, "history source ready");
        Ok(Self {
            http: Client::builder().build()?,
            base,
            anon_key: config.anon_key.clone(),
            timeout,
        })
    }

    pub fn from_optional(config: Option<&SupabaseConfig>, timeout: Duration) -> Result<Self, ApiError> {
        match config {
            Some(config) => Self::new(config, timeout),
            None => Err(ApiError::NotConfigured("supabase")),
        }
    }

    pub async fn fetch_traffic_events(&self, limit: usize) -> Result<Vec<TrafficEventRow>, ApiError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| ApiError::InvalidArgument("supabase url cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(["rest", "v1", "traffic_events"]);
        debug!(url=%url, limit, "fetching traffic events");

        let response = self
            .http
            .get(url)
            .query(&[
                ("select", "*".to_string()),
                ("order", "received_at.desc".to_string()),
                ("limit", limit.to_string()),
            ])
            .header("apikey", &self.anon_key)
            .bearer_auth(&self.anon_key)
            .timeout(self.timeout)
            .send()
            .await?;
        decode_response(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(device: Option<&str>, received_at: &str, sensors: serde_json::Value) -> TrafficEventRow {
        TrafficEventRow {
            id: received_at.to_string(),
            device_id: device.map(str::to_string),
            intersection_id: None,
            sensors: sensors.as_object().cloned(),
            state_snapshot: None,
            evaluation: None,
            ip: None,
            received_at: received_at.to_string(),
        }
    }

    #[test]
    fn metrics_count_devices_recent_events_and_detections() {
        // Arrange
        let now = DateTime::parse_from_rfc3339("2026-03-01T12:00:00Z")
            .expect("now")
            .timestamp_millis();
        let rows = vec![
            row(Some("esp-1"), "2026-03-01T11:30:00Z", json!({"sensor1": 12.0, "sensor2": 80})),
            row(Some("esp-1"), "2026-03-01T10:59:59Z", json!({"sensor1": 30, "sensor4": "5"})),
            row(Some("esp-2"), "garbage", json!({"sensor3": 4, "sensor9": 1})),
            row(None, "2026-03-01T11:00:00Z", json!(null)),
        ];

        // Act
        let metrics = compute_history_metrics(&rows, now, 30.0);

        // Assert
        assert_eq!(metrics.total_events, 4);
        assert_eq!(metrics.events_last_hour, 2);
        assert_eq!(metrics.unique_devices, 2);
        let by_lane: Vec<(&str, u64)> = metrics
            .detections_by_lane
            .iter()
            .map(|d| (d.lane.as_str(), d.count))
            .collect();
        assert_eq!(by_lane, vec![("north", 2), ("west", 0), ("south", 1), ("east", 0)]);
    }

    #[test]
    fn last_hour_window_saturates_at_earliest_clock() {
        let rows = vec![row(Some("esp-1"), "2026-03-01T11:30:00Z", json!(null))];

        let metrics = compute_history_metrics(&rows, i64::MIN, 30.0);

        assert_eq!(metrics.events_last_hour, 1);
    }

    #[test]
    fn missing_configuration_is_reported_not_fatal() {
        let err = SupabaseClient::from_optional(None, Duration::from_secs(1))
            .err()
            .expect("not configured");

        assert!(matches!(err, ApiError::NotConfigured("supabase")));
    }
}
