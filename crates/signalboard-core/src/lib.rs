pub mod alerts;
pub mod analytics;
pub mod analytics_feed;
pub mod backend;
pub mod channel;
pub mod config;
pub mod error;
pub mod history;
pub mod intersection;
pub mod monitor;
pub mod pull;
pub mod push;
pub mod reconcile;
pub mod snapshot;
pub mod sse;
pub mod state;

#[cfg(test)]
mod analytics_tests;

pub use alerts::{derive_alerts, Alert, AlertInputs, AlertLevel, AlertPolicy};
pub use analytics::{AnalyticsOverview, AnalyticsTracker, AnalyticsView};
pub use backend::{BackendApi, ByteStream, HttpBackend};
pub use channel::ChannelStatus;
pub use config::{ClientConfig, SupabaseConfig};
pub use error::{ApiError, StateError};
pub use history::{compute_history_metrics, HistoryMetrics, SupabaseClient};
pub use intersection::{CreateIntersection, IntersectionFilters, IntersectionRecord, IntersectionStatus};
pub use monitor::{DashboardFrame, Monitor, MonitorHandle};
pub use reconcile::{ApplyOutcome, SnapshotStore, Source};
pub use snapshot::{EntityKey, LaneState, SignalPhase, Snapshot};
pub use state::{AppState, Preferences, Selection, SelectionStore, View};
