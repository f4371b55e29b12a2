use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use anyhow::Result;
use chrono::{DateTime, Days, NaiveDate, Utc};
use signalboard_core::{BackendApi, DashboardFrame, Monitor};
use tracing::{debug, info, warn};

const LOG_PREFIX: &str = "signalboard-";
const LOG_SUFFIX: &str = ".jsonl";

pub async fn run_exporter<B: BackendApi + 'static>(
    monitor: &Monitor<B>,
    output_dir: &str,
    retention_days: u64,
) -> Result<()> {
    let out_dir = PathBuf::from(output_dir);
    fs::create_dir_all(&out_dir)?;

    let mut state = ExportState::new(out_dir, retention_days)?;
    let handle = monitor.start();
    let mut revisions = handle.watch_store();
    info!(dir=%state.out_dir.display(), retention_days, "exporter started");

    let result = async {
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                changed = revisions.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let frame = handle.frame(Utc::now().timestamp_millis());
                    state.write_frame(&frame)?;
                    state.maybe_prune()?;
                }
            }
        }
        Ok::<(), anyhow::Error>(())
    }
    .await;

    handle.shutdown().await;
    result
}

pub(crate) struct ExportState {
    out_dir: PathBuf,
    retention_days: u64,
    current_day: String,
    writer: BufWriter<File>,
    last_prune: Instant,
    last_written: Option<(String, i64)>,
}

impl ExportState {
    pub(crate) fn new(out_dir: PathBuf, retention_days: u64) -> Result<Self> {
        let day = Utc::now().format("%Y-%m-%d").to_string();
        let writer = Self::open_writer(&out_dir, &day)?;

        Ok(Self {
            out_dir,
            retention_days,
            current_day: day,
            writer,
            last_prune: Instant::now() - Duration::from_secs(3600),
            last_written: None,
        })
    }

    fn open_writer(out_dir: &Path, day: &str) -> Result<BufWriter<File>> {
        let path = out_dir.join(format!("{LOG_PREFIX}{day}{LOG_SUFFIX}"));
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(BufWriter::new(file))
    }

    fn rotate_if_needed(&mut self, ts: DateTime<Utc>) -> Result<()> {
        let day = ts.format("%Y-%m-%d").to_string();
        if day != self.current_day {
            self.writer.flush()?;
            self.writer = Self::open_writer(&self.out_dir, &day)?;
            debug!(day=%day, "rotated export file");
            self.current_day = day;
        }
        Ok(())
    }

    /// Appends the frame's snapshot once; repeated frames for the same
    /// reading are skipped. Returns whether a line was written.
    pub(crate) fn write_frame(&mut self, frame: &DashboardFrame) -> Result<bool> {
        let Some(snapshot) = &frame.snapshot else {
            return Ok(false);
        };
        let marker = (frame.key.to_string(), snapshot.timestamp);
        if self.last_written.as_ref() == Some(&marker) {
            return Ok(false);
        }

        let ts = DateTime::<Utc>::from_timestamp_millis(snapshot.timestamp).unwrap_or_else(|| {
            warn!(ts = snapshot.timestamp, "snapshot timestamp out of range, using wall clock");
            Utc::now()
        });
        self.rotate_if_needed(ts)?;

        let exported = serde_json::json!({
            "ts": ts,
            "unix_ms": snapshot.timestamp,
            "intersection": frame.key,
            "intersection_name": frame.intersection_name,
            "source": frame.source,
            "connected": frame.connected,
            "lanes": snapshot.lanes,
            "queue": snapshot.queue,
            "config": snapshot.config,
            "health": {
                "databaseConnected": snapshot.database_connected,
                "esp32Connected": snapshot.esp32_connected
            },
            "alerts": frame.alerts
        });

        serde_json::to_writer(&mut self.writer, &exported)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;

        let latest_path = self.out_dir.join("latest.json");
        fs::write(latest_path, serde_json::to_vec_pretty(&exported)?)?;

        self.last_written = Some(marker);
        Ok(true)
    }

    fn maybe_prune(&mut self) -> Result<()> {
        if self.last_prune.elapsed() < Duration::from_secs(1800) {
            return Ok(());
        }
        self.last_prune = Instant::now();

        prune_old_log_files(&self.out_dir, self.retention_days, SystemTime::now())?;

        Ok(())
    }
}

pub(crate) fn prune_old_log_files(out_dir: &Path, retention_days: u64, now: SystemTime) -> Result<()> {
    let today = DateTime::<Utc>::from(now).date_naive();
    let cutoff = today
        .checked_sub_days(Days::new(retention_days))
        .unwrap_or(today);

    for entry in fs::read_dir(out_dir)? {
        let path = entry?.path();
        let Some(date_part) = path
            .file_name()
            .and_then(|v| v.to_str())
            .and_then(|n| n.strip_prefix(LOG_PREFIX))
            .and_then(|v| v.strip_suffix(LOG_SUFFIX))
        else {
            continue;
        };

        let Ok(file_date) = NaiveDate::parse_from_str(date_part, "%Y-%m-%d") else {
            continue;
        };

        if file_date < cutoff {
            debug!(path=%path.display(), "pruning expired export");
            let _ = fs::remove_file(path);
        }
    }

    Ok(())
}
