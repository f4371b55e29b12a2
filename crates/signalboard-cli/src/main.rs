use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use signalboard_core::config::{DEFAULT_BACKEND_URL, DEFAULT_DETECTION_THRESHOLD_CM};
use signalboard_core::{
    compute_history_metrics, AnalyticsTracker, AnalyticsView, ApiError, AppState, BackendApi,
    ClientConfig, CreateIntersection, DashboardFrame, HistoryMetrics, HttpBackend,
    IntersectionFilters, IntersectionRecord, IntersectionStatus, Monitor, Selection,
    SelectionStore, SupabaseClient, SupabaseConfig, View,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod exporter;
#[cfg(test)]
mod exporter_tests;
mod viewer;

#[derive(Debug, Parser)]
#[command(name = "signalboard")]
#[command(about = "Smart traffic light dashboard (pull + push reconciliation)")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(long, env = "SIGNALBOARD_BACKEND_URL", default_value = DEFAULT_BACKEND_URL)]
    backend_url: String,

    #[arg(long, default_value_t = 2000)]
    interval_ms: u64,

    #[arg(long, default_value_t = 5000)]
    analytics_interval_ms: u64,

    #[arg(long, default_value_t = 10_000)]
    timeout_ms: u64,

    #[arg(long, env = "SIGNALBOARD_STATE_DIR", default_value = "./.signalboard")]
    state_dir: PathBuf,

    /// Overrides the saved selection for this invocation.
    #[arg(long)]
    intersection: Option<String>,

    #[arg(long, env = "SIGNALBOARD_SUPABASE_URL")]
    supabase_url: Option<String>,

    #[arg(long, env = "SIGNALBOARD_SUPABASE_ANON_KEY", hide_env_values = true)]
    supabase_anon_key: Option<String>,

    #[arg(long, env = "SIGNALBOARD_DETECTION_THRESHOLD_CM", default_value_t = DEFAULT_DETECTION_THRESHOLD_CM)]
    detection_threshold_cm: f64,
}

#[derive(Debug, Subcommand)]
enum Command {
    Once {
        #[arg(long, value_enum, default_value = "json")]
        format: OutputFormat,
    },
    Run {
        #[arg(long, value_enum, default_value = "human")]
        format: OutputFormat,
        /// Poll only; alerts switch to staleness-based derivation.
        #[arg(long)]
        no_stream: bool,
    },
    View {
        #[arg(long)]
        no_stream: bool,
    },
    Analytics {
        #[arg(long, value_enum, default_value = "json")]
        format: OutputFormat,
    },
    History {
        #[arg(long, default_value_t = 500)]
        limit: usize,
        #[arg(long, value_enum, default_value = "human")]
        format: OutputFormat,
    },
    Export {
        #[arg(long, default_value = "./data/snapshots")]
        output_dir: String,
        #[arg(long, default_value_t = 90)]
        retention_days: u64,
        #[arg(long)]
        no_stream: bool,
    },
    Intersections {
        #[command(subcommand)]
        action: IntersectionsCommand,
    },
}

#[derive(Debug, Subcommand)]
enum IntersectionsCommand {
    List {
        #[arg(long)]
        status: Option<IntersectionStatus>,
        #[arg(long = "id")]
        ids: Vec<String>,
    },
    Create {
        name: String,
        #[arg(long)]
        status: Option<IntersectionStatus>,
        #[arg(long, requires = "longitude")]
        latitude: Option<f64>,
        #[arg(long, requires = "latitude")]
        longitude: Option<f64>,
    },
    SetStatus {
        id: String,
        status: IntersectionStatus,
    },
    Move {
        id: String,
        latitude: f64,
        longitude: f64,
    },
    /// Persists the selection used by every other command.
    Select {
        id: Option<String>,
        #[arg(long, conflicts_with = "id")]
        clear: bool,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Human,
    Json,
    Ndjson,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();

    let config = ClientConfig {
        backend_url: cli.backend_url.clone(),
        pull_interval: Duration::from_millis(cli.interval_ms),
        analytics_interval: Duration::from_millis(cli.analytics_interval_ms),
        request_timeout: Duration::from_millis(cli.timeout_ms),
        state_dir: cli.state_dir.clone(),
        supabase: SupabaseConfig::from_parts(cli.supabase_url.clone(), cli.supabase_anon_key.clone()),
        detection_threshold_cm: cli.detection_threshold_cm,
        ..ClientConfig::default()
    };

    let selections = SelectionStore::new(&config.state_dir);
    let selection = match &cli.intersection {
        Some(id) => Selection::new(id.clone(), id.clone()),
        None => selections.load(),
    };
    let backend = HttpBackend::new(&config)?;

    match cli.command {
        Command::Once { format } => {
            let state = AppState::new(selection, View::Realtime);
            let monitor = Monitor::new(backend, config.with_stream(false), state);
            let frame = monitor.once().await?;
            print_frame(&frame, format)?;
        }
        Command::Run { format, no_stream } => {
            let state = AppState::new(selection, View::Realtime);
            let monitor = Monitor::new(backend, config.with_stream(!no_stream), state);
            stream_loop(&monitor, format).await?;
        }
        Command::View { no_stream } => {
            let history = SupabaseClient::from_optional(config.supabase.as_ref(), config.request_timeout);
            let threshold_cm = config.detection_threshold_cm;
            let state = AppState::new(selection, View::Realtime);
            let monitor = Monitor::new(backend, config.with_stream(!no_stream), state);
            viewer::run_viewer(&monitor, history, threshold_cm, selections).await?;
        }
        Command::Analytics { format } => {
            let key = selection.key();
            let overview = backend.fetch_analytics(&key).await?;
            let view = AnalyticsTracker::new().observe(&key, &overview);
            print_analytics(&view, format)?;
        }
        Command::History { limit, format } => {
            match SupabaseClient::from_optional(config.supabase.as_ref(), config.request_timeout) {
                Ok(client) => {
                    let rows = client.fetch_traffic_events(limit).await?;
                    let metrics = compute_history_metrics(
                        &rows,
                        Utc::now().timestamp_millis(),
                        config.detection_threshold_cm,
                    );
                    print_history(&metrics, format)?;
                }
                Err(ApiError::NotConfigured(what)) => {
                    warn!(source = what, "history unavailable");
                    println!("History unavailable: {what} is not configured (set SIGNALBOARD_SUPABASE_URL and SIGNALBOARD_SUPABASE_ANON_KEY).");
                }
                Err(err) => return Err(err.into()),
            }
        }
        Command::Export {
            output_dir,
            retention_days,
            no_stream,
        } => {
            let state = AppState::new(selection, View::Realtime);
            let monitor = Monitor::new(backend, config.with_stream(!no_stream), state);
            exporter::run_exporter(&monitor, &output_dir, retention_days).await?;
        }
        Command::Intersections { action } => {
            run_intersections(&backend, &selections, action).await?;
        }
    }

    Ok(())
}

async fn run_intersections(
    backend: &HttpBackend,
    selections: &SelectionStore,
    action: IntersectionsCommand,
) -> Result<()> {
    match action {
        IntersectionsCommand::List { status, ids } => {
            let list = backend
                .list_intersections(&IntersectionFilters { status, ids })
                .await?;
            if list.persistence_disabled == Some(true) {
                warn!("backend persistence is disabled, list may be incomplete");
            }
            for record in &list.intersections {
                print_intersection(record);
            }
        }
        IntersectionsCommand::Create {
            name,
            status,
            latitude,
            longitude,
        } => {
            let payload = CreateIntersection {
                name,
                status,
                latitude,
                longitude,
                location: None,
                meta: None,
            };
            let created = backend.create_intersection(&payload).await?;
            print_intersection(&created.intersection);
        }
        IntersectionsCommand::SetStatus { id, status } => {
            let updated = backend.update_intersection_status(&id, status).await?;
            print_intersection(&updated.intersection);
        }
        IntersectionsCommand::Move {
            id,
            latitude,
            longitude,
        } => {
            let updated = backend
                .update_intersection_coords(&id, latitude, longitude)
                .await?;
            print_intersection(&updated.intersection);
        }
        IntersectionsCommand::Select { id, clear } => {
            let selection = match (id, clear) {
                (_, true) | (None, false) => Selection::default(),
                (Some(id), false) => {
                    let filters = IntersectionFilters {
                        status: None,
                        ids: vec![id.clone()],
                    };
                    let list = backend.list_intersections(&filters).await?;
                    let Some(record) = list.intersections.into_iter().find(|r| r.id == id) else {
                        bail!("intersection {id} not found");
                    };
                    Selection::new(record.id, record.name)
                }
            };
            selections.save(&selection)?;
            info!(key=%selection.key(), path=%selections.path().display(), "selection saved");
            println!("Selected: {} ({})", selection.name, selection.key());
        }
    }

    Ok(())
}

async fn stream_loop<B: BackendApi + 'static>(monitor: &Monitor<B>, format: OutputFormat) -> Result<()> {
    let handle = monitor.start();
    let mut revisions = handle.watch_store();
    let mut connectivity = handle.watch_connectivity();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                warn!("received ctrl-c, stopping");
                break;
            }
            changed = revisions.changed() => {
                if changed.is_err() {
                    break;
                }
                let frame = handle.frame(Utc::now().timestamp_millis());
                // Accepted writes for other intersections also bump the revision.
                if frame.snapshot.is_some() {
                    print_frame(&frame, format)?;
                }
            }
            changed = connectivity.changed() => {
                if changed.is_err() {
                    break;
                }
                let connected = *connectivity.borrow_and_update();
                info!(connected, "stream connectivity changed");
                if !connected {
                    print_frame(&handle.frame(Utc::now().timestamp_millis()), format)?;
                }
            }
        }
    }

    handle.shutdown().await;
    Ok(())
}

pub(crate) fn format_ms(ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .map(|ts| ts.to_rfc3339())
        .unwrap_or_else(|| "n/a".to_string())
}

fn print_frame(frame: &DashboardFrame, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(frame)?);
        }
        OutputFormat::Ndjson => {
            println!("{}", serde_json::to_string(frame)?);
        }
        OutputFormat::Human => {
            println!("=== {} [{}] ===", frame.intersection_name, frame.key);
            match frame.last_updated_ms {
                Some(ms) => println!("Updated:    {}", format_ms(ms)),
                None => println!("Updated:    never"),
            }
            println!(
                "Link:       stream={} source={}",
                frame.connected,
                frame
                    .source
                    .map(|s| format!("{s:?}").to_lowercase())
                    .unwrap_or_else(|| "-".to_string())
            );
            if let Some(err) = &frame.pull_error {
                println!("Pull error: {err}");
            }

            if let Some(snapshot) = &frame.snapshot {
                println!(
                    "Health:     database={} controller={}",
                    flag(snapshot.database_connected),
                    flag(snapshot.esp32_connected)
                );
                for lane in &snapshot.lanes {
                    println!(
                        "  {:<8} {:<10} occupied={:<5} waiting={:<5} distance={} cycles={}",
                        lane.id,
                        lane.state.label(),
                        lane.is_occupied,
                        lane.waiting,
                        lane.last_distance_cm
                            .map(|cm| format!("{cm:.1}cm"))
                            .unwrap_or_else(|| "n/a".to_string()),
                        lane.cycles_completed
                    );
                }
                if !snapshot.queue.is_empty() {
                    println!("Queue:      {}", snapshot.queue.join(" → "));
                }
            }

            for alert in &frame.alerts {
                match &alert.description {
                    Some(description) => println!("[{:?}] {}: {description}", alert.level, alert.title),
                    None => println!("[{:?}] {}", alert.level, alert.title),
                }
            }
        }
    }

    Ok(())
}

fn flag(value: Option<bool>) -> &'static str {
    match value {
        Some(true) => "up",
        Some(false) => "down",
        None => "unknown",
    }
}

fn print_analytics(view: &AnalyticsView, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(view)?),
        OutputFormat::Ndjson => println!("{}", serde_json::to_string(view)?),
        OutputFormat::Human => {
            println!("=== Analytics [{}] ===", view.key);
            println!(
                "Transitions: {}  events analyzed: {}",
                view.total_transitions, view.events_analyzed
            );
            for lane in &view.transitions {
                println!("  {:<8} → green x{}", lane.lane_key, lane.changes);
            }
            println!("Wait histogram:");
            for row in &view.wait_histogram {
                println!("  {:<8} {}", row.bucket, row.total());
            }
            println!("Durations:");
            for row in &view.durations {
                println!(
                    "  {:<8} green {:.1}s red {:.1}s",
                    row.lane_key, row.green_seconds, row.red_seconds
                );
            }
            println!("Green share:");
            for row in &view.green_share {
                println!("  {:<8} {:.0}%", row.lane_key, row.green_ratio * 100.0);
            }
            if !view.green_trend.is_empty() {
                println!("Green cycle trend:");
                for row in &view.green_trend {
                    println!(
                        "  {} avg {:.1}s ({} samples)",
                        row.label, row.avg_green_seconds, row.sample_count
                    );
                }
            }
        }
    }
    Ok(())
}

fn print_history(metrics: &HistoryMetrics, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(metrics)?),
        OutputFormat::Ndjson => println!("{}", serde_json::to_string(metrics)?),
        OutputFormat::Human => {
            println!("=== Controller history ===");
            println!("Events:       {}", metrics.total_events);
            println!("Last hour:    {}", metrics.events_last_hour);
            println!("Devices:      {}", metrics.unique_devices);
            for lane in &metrics.detections_by_lane {
                println!("  {:<8} {} detections", lane.lane, lane.count);
            }
        }
    }
    Ok(())
}

fn print_intersection(record: &IntersectionRecord) {
    let coords = match (record.latitude, record.longitude) {
        (Some(lat), Some(lng)) => format!("{lat:.5},{lng:.5}"),
        _ => "-".to_string(),
    };
    println!(
        "{:<24} {:<28} {:<12} {:<22} last_seen={}",
        record.id,
        record.name,
        record.status,
        coords,
        record.last_seen.as_deref().unwrap_or("never")
    );
}
