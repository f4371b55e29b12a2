use std::collections::{BTreeMap, BTreeSet, HashSet};

use chrono::{DateTime, Local, TimeZone};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::snapshot::EntityKey;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsOverview {
    #[serde(default)]
    pub intersection_id: String,
    #[serde(default)]
    pub transition_counts: Vec<PhaseTransitionCount>,
    #[serde(default)]
    pub lane_durations: Vec<LaneDurationSummary>,
    #[serde(default)]
    pub green_share: Vec<GreenShareSummary>,
    #[serde(default)]
    pub presence_samples: Vec<PresenceSample>,
    #[serde(default)]
    pub green_cycle_trend: Vec<GreenCycleTrendPoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub totals: Option<AnalyticsTotals>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransitionTarget {
    Green,
    Red,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseTransitionCount {
    pub lane_key: String,
    pub to_state: TransitionTarget,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaneDurationSummary {
    pub lane_key: String,
    pub green_ms: f64,
    pub red_ms: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GreenShareSummary {
    pub lane_key: String,
    pub green_ratio: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceSample {
    pub lane_key: String,
    pub wait_ms: f64,
    pub detected_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GreenCycleTrendPoint {
    pub bucket: String,
    pub avg_green_ms: f64,
    pub sample_count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyticsTotals {
    pub transitions: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WaitBucket {
    pub label: &'static str,
    pub min_ms: f64,
    pub max_ms: f64,
}

impl WaitBucket {
    pub fn contains(&self, wait_ms: f64) -> bool {
        wait_ms >= self.min_ms && wait_ms < self.max_ms
    }
}

pub const WAIT_BUCKETS: [WaitBucket; 6] = [
    WaitBucket { label: "[0,5)", min_ms: 0.0, max_ms: 5_000.0 },
    WaitBucket { label: "[5,10)", min_ms: 5_000.0, max_ms: 10_000.0 },
    WaitBucket { label: "[10,20)", min_ms: 10_000.0, max_ms: 20_000.0 },
    WaitBucket { label: "[20,40)", min_ms: 20_000.0, max_ms: 40_000.0 },
    WaitBucket { label: "[40,60)", min_ms: 40_000.0, max_ms: 60_000.0 },
    WaitBucket { label: "[60,∞)", min_ms: 60_000.0, max_ms: f64::INFINITY },
];

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LaneCount {
    pub lane_key: String,
    pub changes: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistogramRow {
    pub bucket: &'static str,
    pub counts: BTreeMap<String, u64>,
}

impl HistogramRow {
    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LaneDurationRow {
    pub lane_key: String,
    pub green_seconds: f64,
    pub red_seconds: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendRow {
    pub label: String,
    pub avg_green_seconds: f64,
    pub sample_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GreenShareRow {
    pub lane_key: String,
    pub green_ratio: f64,
    pub remainder: f64,
}

pub fn lane_keys(overview: &AnalyticsOverview) -> Vec<String> {
    let mut keys = BTreeSet::new();
    keys.extend(overview.transition_counts.iter().map(|i| i.lane_key.clone()));
    keys.extend(overview.lane_durations.iter().map(|i| i.lane_key.clone()));
    keys.extend(overview.presence_samples.iter().map(|i| i.lane_key.clone()));
    keys.extend(overview.green_share.iter().map(|i| i.lane_key.clone()));
    keys.into_iter().collect()
}

pub fn transition_dataset(counts: &[PhaseTransitionCount], lane_keys: &[String]) -> Vec<LaneCount> {
    lane_keys
        .iter()
        .map(|lane_key| LaneCount {
            lane_key: lane_key.clone(),
            changes: counts
                .iter()
                .find(|c| &c.lane_key == lane_key && c.to_state == TransitionTarget::Green)
                .map(|c| c.count)
                .unwrap_or(0),
        })
        .collect()
}

pub fn wait_histogram(samples: &[PresenceSample], lane_keys: &[String]) -> Vec<HistogramRow> {
    let mut rows: Vec<HistogramRow> = WAIT_BUCKETS
        .iter()
        .map(|bucket| HistogramRow {
            bucket: bucket.label,
            counts: lane_keys.iter().map(|k| (k.clone(), 0)).collect(),
        })
        .collect();

    for sample in samples {
        let Some(idx) = WAIT_BUCKETS.iter().position(|b| b.contains(sample.wait_ms)) else {
            debug!(lane=%sample.lane_key, wait_ms=sample.wait_ms, "wait sample outside every bucket");
            continue;
        };
        *rows[idx].counts.entry(sample.lane_key.clone()).or_insert(0) += 1;
    }

    rows
}

pub fn duration_dataset(durations: &[LaneDurationSummary]) -> Vec<LaneDurationRow> {
    durations
        .iter()
        .map(|d| LaneDurationRow {
            lane_key: d.lane_key.clone(),
            green_seconds: d.green_ms / 1_000.0,
            red_seconds: d.red_ms / 1_000.0,
        })
        .collect()
}

pub fn green_trend_dataset(trend: &[GreenCycleTrendPoint]) -> Vec<TrendRow> {
    green_trend_dataset_in(trend, &Local)
}

/// Bucket labels are rendered in `tz`; unparseable buckets keep their raw text.
pub fn green_trend_dataset_in<Tz>(trend: &[GreenCycleTrendPoint], tz: &Tz) -> Vec<TrendRow>
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    trend
        .iter()
        .map(|point| TrendRow {
            label: DateTime::parse_from_rfc3339(&point.bucket)
                .map(|ts| ts.with_timezone(tz).format("%H:%M:%S").to_string())
                .unwrap_or_else(|_| point.bucket.clone()),
            avg_green_seconds: point.avg_green_ms / 1_000.0,
            sample_count: point.sample_count,
        })
        .collect()
}

pub fn green_share_dataset(shares: &[GreenShareSummary], lane_keys: &[String]) -> Vec<GreenShareRow> {
    lane_keys
        .iter()
        .map(|lane_key| {
            let green_ratio = shares
                .iter()
                .find(|s| &s.lane_key == lane_key)
                .map(|s| s.green_ratio)
                .unwrap_or(0.0);
            GreenShareRow {
                lane_key: lane_key.clone(),
                green_ratio,
                remainder: (1.0 - green_ratio).max(0.0),
            }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsView {
    pub key: EntityKey,
    pub lane_keys: Vec<String>,
    pub transitions: Vec<LaneCount>,
    pub total_transitions: u64,
    pub events_analyzed: u64,
    pub wait_histogram: Vec<HistogramRow>,
    pub durations: Vec<LaneDurationRow>,
    pub green_trend: Vec<TrendRow>,
    pub green_share: Vec<GreenShareRow>,
}

#[derive(Debug, Default)]
pub struct AnalyticsTracker {
    key: Option<EntityKey>,
    transitions: BTreeMap<String, u64>,
    seen_presence: HashSet<(String, String)>,
    presence_total: u64,
}

impl AnalyticsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key(&self) -> Option<&EntityKey> {
        self.key.as_ref()
    }

    pub fn reset(&mut self, key: EntityKey) {
        debug!(key=%key, "analytics tracker reset");
        self.key = Some(key);
        self.transitions.clear();
        self.seen_presence.clear();
        self.presence_total = 0;
    }

    pub fn select(&mut self, key: &EntityKey) -> bool {
        if self.key.as_ref() == Some(key) {
            return false;
        }
        self.reset(key.clone());
        true
    }

    pub fn observe(&mut self, key: &EntityKey, overview: &AnalyticsOverview) -> AnalyticsView {
        let fresh = self.select(key);
        let lane_keys = lane_keys(overview);
        let raw = transition_dataset(&overview.transition_counts, &lane_keys);

        for entry in &raw {
            let previous = self.transitions.get(&entry.lane_key).copied().unwrap_or(0);
            let next = if fresh {
                entry.changes
            } else {
                entry.changes.max(previous)
            };
            self.transitions.insert(entry.lane_key.clone(), next);
        }
        // Lanes missing from this window keep their max; only lane_keys render.

        for sample in &overview.presence_samples {
            let marker = (sample.lane_key.clone(), sample.detected_at.clone());
            if self.seen_presence.insert(marker) {
                self.presence_total += 1;
            }
        }

        let transitions: Vec<LaneCount> = if self.transitions.is_empty() {
            raw
        } else {
            lane_keys
                .iter()
                .map(|lane_key| LaneCount {
                    lane_key: lane_key.clone(),
                    changes: self.transitions.get(lane_key).copied().unwrap_or(0),
                })
                .collect()
        };
        let client_total: u64 = transitions.iter().map(|t| t.changes).sum();
        let total_transitions = overview
            .totals
            .map(|t| t.transitions)
            .unwrap_or(client_total);

        AnalyticsView {
            key: key.clone(),
            transitions,
            total_transitions,
            events_analyzed: self
                .presence_total
                .max(overview.presence_samples.len() as u64),
            wait_histogram: wait_histogram(&overview.presence_samples, &lane_keys),
            durations: duration_dataset(&overview.lane_durations),
            green_trend: green_trend_dataset(&overview.green_cycle_trend),
            green_share: green_share_dataset(&overview.green_share, &lane_keys),
            lane_keys,
        }
    }
}
