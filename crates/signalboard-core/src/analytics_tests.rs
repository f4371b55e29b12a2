use chrono::Utc;

use crate::analytics::{
    green_share_dataset, green_trend_dataset_in, lane_keys, wait_histogram, AnalyticsOverview,
    AnalyticsTotals, AnalyticsTracker, GreenCycleTrendPoint, GreenShareSummary, LaneDurationSummary,
    PhaseTransitionCount, PresenceSample, TransitionTarget, WAIT_BUCKETS,
};
use crate::snapshot::EntityKey;

fn to_green(lane: &str, count: u64) -> PhaseTransitionCount {
    PhaseTransitionCount {
        lane_key: lane.to_string(),
        to_state: TransitionTarget::Green,
        count,
    }
}

fn sample(lane: &str, wait_ms: f64, detected_at: &str) -> PresenceSample {
    PresenceSample {
        lane_key: lane.to_string(),
        wait_ms,
        detected_at: detected_at.to_string(),
    }
}

fn overview_with_green(counts: &[(&str, u64)]) -> AnalyticsOverview {
    AnalyticsOverview {
        transition_counts: counts.iter().map(|(lane, c)| to_green(lane, *c)).collect(),
        ..AnalyticsOverview::default()
    }
}

fn bucket_of(wait_ms: f64) -> &'static str {
    let lanes = vec!["north".to_string()];
    let rows = wait_histogram(&[sample("north", wait_ms, "t")], &lanes);
    rows.iter()
        .find(|row| row.total() == 1)
        .map(|row| row.bucket)
        .expect("sample lands in a bucket")
}

#[test]
fn histogram_bucket_boundaries() {
    assert_eq!(bucket_of(0.0), "[0,5)");
    assert_eq!(bucket_of(4_999.0), "[0,5)");
    assert_eq!(bucket_of(5_000.0), "[5,10)");
    assert_eq!(bucket_of(59_999.0), "[40,60)");
    assert_eq!(bucket_of(3_600_000.0), "[60,∞)");
}

#[test]
fn histogram_counts_per_lane_and_drops_negative_waits() {
    // Arrange
    let lanes = vec!["east".to_string(), "north".to_string()];
    let samples = vec![
        sample("north", 1_000.0, "a"),
        sample("north", 2_000.0, "b"),
        sample("east", 12_000.0, "c"),
        sample("east", -5.0, "d"),
    ];

    // Act
    let rows = wait_histogram(&samples, &lanes);

    // Assert
    assert_eq!(rows.len(), WAIT_BUCKETS.len());
    assert_eq!(rows[0].counts.get("north"), Some(&2));
    assert_eq!(rows[0].counts.get("east"), Some(&0));
    assert_eq!(rows[2].counts.get("east"), Some(&1));
    assert_eq!(rows.iter().map(|r| r.total()).sum::<u64>(), 3);
}

#[test]
fn lane_keys_are_union_sorted() {
    let overview = AnalyticsOverview {
        transition_counts: vec![to_green("west", 1)],
        lane_durations: vec![LaneDurationSummary {
            lane_key: "north".into(),
            green_ms: 1.0,
            red_ms: 2.0,
        }],
        presence_samples: vec![sample("east", 1.0, "x")],
        green_share: vec![GreenShareSummary {
            lane_key: "north".into(),
            green_ratio: 0.5,
        }],
        ..AnalyticsOverview::default()
    };

    assert_eq!(lane_keys(&overview), vec!["east", "north", "west"]);
}

#[test]
fn cumulative_counter_holds_running_max() {
    // Arrange
    let mut tracker = AnalyticsTracker::new();
    let key = EntityKey::new("A");

    // Act
    let shown: Vec<u64> = [3, 7, 5, 9]
        .iter()
        .map(|c| tracker.observe(&key, &overview_with_green(&[("north", *c)])).transitions[0].changes)
        .collect();

    // Assert
    assert_eq!(shown, vec![3, 7, 7, 9]);
}

#[test]
fn lane_missing_from_one_window_keeps_its_max() {
    // Arrange
    let mut tracker = AnalyticsTracker::new();
    let key = EntityKey::new("A");
    tracker.observe(&key, &overview_with_green(&[("north", 7)]));

    // Act
    let gap = tracker.observe(&key, &overview_with_green(&[("south", 1)]));
    let back = tracker.observe(&key, &overview_with_green(&[("north", 3)]));

    // Assert
    assert_eq!(gap.lane_keys, vec!["south"]);
    assert_eq!(back.transitions[0].lane_key, "north");
    assert_eq!(back.transitions[0].changes, 7, "max must not drop while the lane is absent");
}

#[test]
fn switching_entity_resets_running_max() {
    // Arrange
    let mut tracker = AnalyticsTracker::new();
    let a = EntityKey::new("A");
    let b = EntityKey::new("B");
    tracker.observe(&a, &overview_with_green(&[("north", 7)]));

    // Act
    tracker.observe(&b, &overview_with_green(&[("north", 2)]));
    let back = tracker.observe(&a, &overview_with_green(&[("north", 4)]));

    // Assert
    assert_eq!(back.transitions[0].changes, 4, "floor of 7 must not survive the round trip");
    assert_eq!(back.total_transitions, 4);
}

#[test]
fn server_total_overrides_client_sum() {
    let mut tracker = AnalyticsTracker::new();
    let key = EntityKey::default_key();
    let mut overview = overview_with_green(&[("north", 2), ("south", 3)]);
    overview.totals = Some(AnalyticsTotals { transitions: 40 });

    let view = tracker.observe(&key, &overview);

    assert_eq!(view.total_transitions, 40);
    assert_eq!(view.transitions.iter().map(|t| t.changes).sum::<u64>(), 5);
}

#[test]
fn presence_dedup_is_monotonic_over_sliding_window() {
    // Arrange
    let mut tracker = AnalyticsTracker::new();
    let key = EntityKey::new("A");
    let first = AnalyticsOverview {
        presence_samples: vec![sample("north", 1.0, "t1"), sample("north", 1.0, "t2")],
        ..AnalyticsOverview::default()
    };
    let slid = AnalyticsOverview {
        presence_samples: vec![sample("north", 1.0, "t2"), sample("north", 1.0, "t3")],
        ..AnalyticsOverview::default()
    };

    // Act
    let before = tracker.observe(&key, &first).events_analyzed;
    let after = tracker.observe(&key, &slid).events_analyzed;
    tracker.reset(EntityKey::new("B"));
    let other = tracker.observe(&EntityKey::new("B"), &slid).events_analyzed;

    // Assert
    assert_eq!(before, 2);
    assert_eq!(after, 3);
    assert_eq!(other, 2);
}

#[test]
fn green_share_remainder_is_clamped() {
    let lanes = vec!["north".to_string(), "south".to_string()];
    let shares = vec![GreenShareSummary {
        lane_key: "north".into(),
        green_ratio: 1.02,
    }];

    let rows = green_share_dataset(&shares, &lanes);

    assert_eq!(rows[0].remainder, 0.0);
    assert_eq!(rows[1].green_ratio, 0.0);
    assert_eq!(rows[1].remainder, 1.0);
}

#[test]
fn trend_converts_units_and_formats_labels() {
    let trend = vec![
        GreenCycleTrendPoint {
            bucket: "2026-01-02T03:04:05Z".into(),
            avg_green_ms: 12_500.0,
            sample_count: 3,
        },
        GreenCycleTrendPoint {
            bucket: "not-a-date".into(),
            avg_green_ms: 0.0,
            sample_count: 0,
        },
    ];

    let rows = green_trend_dataset_in(&trend, &Utc);

    assert_eq!(rows[0].label, "03:04:05");
    assert_eq!(rows[0].avg_green_seconds, 12.5);
    assert_eq!(rows[1].label, "not-a-date");
}
