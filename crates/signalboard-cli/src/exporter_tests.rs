use crate::exporter::{prune_old_log_files, ExportState};
use chrono::{TimeZone, Utc};
use signalboard_core::{DashboardFrame, EntityKey, Snapshot, Source};
use std::env;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

fn make_temp_dir(name: &str) -> PathBuf {
    let mut path = env::temp_dir();
    let uniq = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .expect("unix epoch")
        .as_nanos();
    path.push(format!("signalboard-tests-{name}-{uniq}"));
    fs::create_dir_all(&path).expect("create temp dir");
    path
}

fn frame(ts_ms: i64) -> DashboardFrame {
    let snapshot: Snapshot = serde_json::from_value(serde_json::json!({
        "timestamp": ts_ms,
        "lanes": [{"id": "north", "state": "red", "waiting": true}],
        "queue": ["north"],
        "intersectionId": "cross-1"
    }))
    .expect("snapshot");

    DashboardFrame {
        key: EntityKey::new("cross-1"),
        intersection_name: "Main & 5th".to_string(),
        snapshot: Some(Arc::new(snapshot)),
        source: Some(Source::Push),
        last_updated_ms: Some(ts_ms),
        connected: true,
        pull_error: None,
        alerts: Vec::new(),
    }
}

#[test]
fn prune_removes_only_old_log_files() {
    // Arrange
    let dir = make_temp_dir("old-vs-fresh");
    let old_log = dir.join("signalboard-2025-11-16.jsonl");
    let fresh_log = dir.join("signalboard-2026-02-15.jsonl");
    let unrelated = dir.join("notes.txt");
    fs::write(&old_log, "old").expect("write old log");
    fs::write(&fresh_log, "fresh").expect("write fresh log");
    fs::write(&unrelated, "keep").expect("write unrelated");

    let now: SystemTime = Utc
        .with_ymd_and_hms(2026, 2, 15, 0, 0, 0)
        .single()
        .expect("valid date")
        .into();

    // Act
    prune_old_log_files(&dir, 90, now).expect("prune");

    // Assert
    assert!(!old_log.exists(), "old log should be pruned");
    assert!(fresh_log.exists(), "fresh log should be kept");
    assert!(unrelated.exists(), "non-log file should never be pruned");

    let _ = fs::remove_dir_all(dir);
}

#[test]
fn prune_keeps_boundary_age_log_file() {
    // Arrange
    let dir = make_temp_dir("boundary");
    let boundary_log = dir.join("signalboard-2025-11-17.jsonl");
    fs::write(&boundary_log, "boundary").expect("write boundary log");

    let now: SystemTime = Utc
        .with_ymd_and_hms(2026, 2, 15, 0, 0, 0)
        .single()
        .expect("valid date")
        .into();

    // Act
    prune_old_log_files(&dir, 90, now).expect("prune");

    // Assert
    assert!(
        boundary_log.exists(),
        "log exactly on retention boundary should be kept"
    );

    let _ = fs::remove_dir_all(dir);
}

#[test]
fn export_writes_each_snapshot_once_into_its_day_file() {
    // Arrange
    let dir = make_temp_dir("write-once");
    let mut state = ExportState::new(dir.clone(), 90).expect("export state");
    let ts = Utc
        .with_ymd_and_hms(2026, 3, 1, 8, 30, 0)
        .single()
        .expect("valid date")
        .timestamp_millis();

    // Act
    let first = state.write_frame(&frame(ts)).expect("first write");
    let repeat = state.write_frame(&frame(ts)).expect("repeat write");
    let next = state.write_frame(&frame(ts + 1000)).expect("next write");

    // Assert
    assert!(first);
    assert!(!repeat, "same reading must not be appended twice");
    assert!(next);

    let log = fs::read_to_string(dir.join("signalboard-2026-03-01.jsonl")).expect("day file");
    let lines: Vec<serde_json::Value> = log
        .lines()
        .map(|line| serde_json::from_str(line).expect("json line"))
        .collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["intersection"], "cross-1");
    assert_eq!(lines[0]["source"], "push");
    assert_eq!(lines[1]["unix_ms"], ts + 1000);

    let latest: serde_json::Value =
        serde_json::from_slice(&fs::read(dir.join("latest.json")).expect("latest")).expect("latest json");
    assert_eq!(latest["unix_ms"], ts + 1000);

    let _ = fs::remove_dir_all(dir);
}

#[test]
fn export_skips_frames_without_snapshot() {
    let dir = make_temp_dir("empty-frame");
    let mut state = ExportState::new(dir.clone(), 90).expect("export state");
    let mut empty = frame(1);
    empty.snapshot = None;

    let written = state.write_frame(&empty).expect("write");

    assert!(!written);
    assert!(!dir.join("latest.json").exists());

    let _ = fs::remove_dir_all(dir);
}
