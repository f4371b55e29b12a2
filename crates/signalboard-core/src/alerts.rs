use serde::Serialize;

use crate::snapshot::Snapshot;

pub const STALE_WARNING_SECS: f64 = 5.0;
pub const STALE_CRITICAL_SECS: f64 = 15.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub id: String,
    pub level: AlertLevel,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Alert {
    fn new(id: impl Into<String>, level: AlertLevel, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            level,
            title: title.into(),
            description: None,
        }
    }

    fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// The two policies produce different alert volumes and are never combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertPolicy {
    ConnectivityPrimary,
    StalenessPrimary,
}

#[derive(Debug, Clone, Copy)]
pub struct AlertInputs<'a> {
    pub snapshot: Option<&'a Snapshot>,
    pub last_updated_ms: Option<i64>,
    pub now_ms: i64,
    pub connected: bool,
}

pub fn derive_alerts(policy: AlertPolicy, inputs: AlertInputs<'_>) -> Vec<Alert> {
    match policy {
        AlertPolicy::ConnectivityPrimary => connectivity_alerts(inputs),
        AlertPolicy::StalenessPrimary => staleness_alerts(inputs),
    }
}

fn connectivity_alerts(inputs: AlertInputs<'_>) -> Vec<Alert> {
    if inputs.connected {
        return Vec::new();
    }
    vec![
        Alert::new("backend-disconnected", AlertLevel::Critical, "Connection to backend lost")
            .describe("Realtime updates cannot be received."),
    ]
}

fn staleness_alerts(inputs: AlertInputs<'_>) -> Vec<Alert> {
    let (Some(snapshot), Some(last_updated)) = (inputs.snapshot, inputs.last_updated_ms) else {
        return vec![Alert::new("no-data", AlertLevel::Info, "No data received yet")
            .describe("Waiting for the first reading from the controller.")];
    };

    let mut alerts = Vec::new();

    let staleness = inputs.now_ms.saturating_sub(last_updated) as f64 / 1000.0;
    if staleness > STALE_CRITICAL_SECS {
        alerts.push(
            Alert::new("stale-data", AlertLevel::Critical, "No new readings")
                .describe(format!("Last update {staleness:.0} s ago.")),
        );
    } else if staleness > STALE_WARNING_SECS {
        alerts.push(
            Alert::new("stale-data", AlertLevel::Warning, "No new readings")
                .describe(format!("Last update {staleness:.0} s ago.")),
        );
    }

    let max_red_ms = snapshot.config.max_red_ms_or_zero();
    if max_red_ms > 0 {
        let limit_ms = i64::try_from(max_red_ms).unwrap_or(i64::MAX);
        for lane in snapshot.lanes.iter().filter(|lane| lane.waiting) {
            let Some(red_since) = lane.red_since else {
                continue;
            };
            let in_red_ms = inputs.now_ms.saturating_sub(red_since);
            if in_red_ms > limit_ms {
                alerts.push(
                    Alert::new(
                        format!("lane-{}-overdue", lane.id),
                        AlertLevel::Critical,
                        format!("Lane {} exceeds max red", lane.id),
                    )
                    .describe(format!(
                        "Waiting {:.0} s in red (limit {:.0} s).",
                        in_red_ms as f64 / 1000.0,
                        max_red_ms as f64 / 1000.0
                    )),
                );
            }
        }
    }

    if !snapshot.queue.is_empty() {
        alerts.push(
            Alert::new("queue-active", AlertLevel::Info, "Priority queue active")
                .describe(snapshot.queue.join(" → ")),
        );
    }

    alerts
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snapshot(value: serde_json::Value) -> Snapshot {
        serde_json::from_value(value).expect("snapshot")
    }

    fn inputs(snapshot: Option<&Snapshot>, now_ms: i64, connected: bool) -> AlertInputs<'_> {
        AlertInputs {
            snapshot,
            last_updated_ms: snapshot.map(|s| s.timestamp),
            now_ms,
            connected,
        }
    }

    #[test]
    fn disconnected_emits_single_critical_alert() {
        let snap = snapshot(json!({"timestamp": 0, "queue": ["north"]}));

        let alerts = derive_alerts(AlertPolicy::ConnectivityPrimary, inputs(Some(&snap), 60_000, false));

        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].id, "backend-disconnected");
        assert_eq!(alerts[0].level, AlertLevel::Critical);
        assert!(derive_alerts(AlertPolicy::ConnectivityPrimary, inputs(Some(&snap), 60_000, true)).is_empty());
    }

    #[test]
    fn staleness_policy_without_data_reports_info_only() {
        let alerts = derive_alerts(AlertPolicy::StalenessPrimary, inputs(None, 1_000, false));

        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].id, "no-data");
        assert_eq!(alerts[0].level, AlertLevel::Info);
    }

    #[test]
    fn staleness_levels_follow_thresholds() {
        let snap = snapshot(json!({"timestamp": 100_000}));
        let level_at = |now: i64| {
            derive_alerts(AlertPolicy::StalenessPrimary, inputs(Some(&snap), now, true))
                .into_iter()
                .find(|a| a.id == "stale-data")
                .map(|a| a.level)
        };

        assert_eq!(level_at(105_000), None);
        assert_eq!(level_at(105_001), Some(AlertLevel::Warning));
        assert_eq!(level_at(115_000), Some(AlertLevel::Warning));
        assert_eq!(level_at(115_001), Some(AlertLevel::Critical));
    }

    #[test]
    fn overdue_waiting_lane_and_queue_are_reported_in_order() {
        // Arrange
        let snap = snapshot(json!({
            "timestamp": 100_000,
            "lanes": [
                {"id": "north", "state": "red", "waiting": true, "redSince": 60_000},
                {"id": "south", "state": "red", "waiting": false, "redSince": 10_000},
                {"id": "east", "state": "red", "waiting": true, "redSince": null}
            ],
            "queue": ["north", "east"],
            "config": {"maxRedMs": 30_000}
        }));

        // Act
        let alerts = derive_alerts(AlertPolicy::StalenessPrimary, inputs(Some(&snap), 101_000, true));

        // Assert
        let ids: Vec<&str> = alerts.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["lane-north-overdue", "queue-active"]);
        assert_eq!(alerts[1].description.as_deref(), Some("north → east"));
    }

    #[test]
    fn zero_threshold_disables_overdue_alerts() {
        let snap = snapshot(json!({
            "timestamp": 100_000,
            "lanes": [{"id": "north", "state": "red", "waiting": true, "redSince": 0}]
        }));

        let alerts = derive_alerts(AlertPolicy::StalenessPrimary, inputs(Some(&snap), 100_000, true));

        assert!(alerts.is_empty());
    }

    #[test]
    fn extreme_timestamps_and_limits_saturate() {
        // Arrange
        let ancient = snapshot(json!({
            "timestamp": i64::MIN,
            "lanes": [{"id": "north", "state": "red", "waiting": true, "redSince": i64::MIN}],
            "config": {"maxRedMs": 1}
        }));
        let unbounded = snapshot(json!({
            "timestamp": 0,
            "lanes": [{"id": "north", "state": "red", "waiting": true, "redSince": 0}],
            "config": {"maxRedMs": u64::MAX}
        }));

        // Act
        let overdue = derive_alerts(AlertPolicy::StalenessPrimary, inputs(Some(&ancient), i64::MAX, true));
        let within = derive_alerts(AlertPolicy::StalenessPrimary, inputs(Some(&unbounded), i64::MAX, true));

        // Assert
        let ids: Vec<&str> = overdue.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["stale-data", "lane-north-overdue"]);
        assert!(within.iter().all(|a| a.id != "lane-north-overdue"));
    }

    #[test]
    fn derivation_is_pure() {
        let snap = snapshot(json!({"timestamp": 1_000, "queue": ["west"], "config": {"max_red_ms": 1}}));
        let args = inputs(Some(&snap), 30_000, true);

        let first = derive_alerts(AlertPolicy::StalenessPrimary, args);
        let second = derive_alerts(AlertPolicy::StalenessPrimary, args);

        assert_eq!(first, second);
    }
}
