use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::info;

use crate::alerts::{derive_alerts, Alert, AlertInputs, AlertPolicy};
use crate::analytics::AnalyticsView;
use crate::analytics_feed::AnalyticsChannel;
use crate::backend::BackendApi;
use crate::channel::{ChannelContext, ChannelStatus};
use crate::config::ClientConfig;
use crate::error::ApiError;
use crate::pull::PullChannel;
use crate::push::PushChannel;
use crate::reconcile::{SnapshotStore, Source};
use crate::snapshot::{EntityKey, Snapshot};
use crate::state::AppState;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardFrame {
    pub key: EntityKey,
    pub intersection_name: String,
    pub snapshot: Option<Arc<Snapshot>>,
    pub source: Option<Source>,
    pub last_updated_ms: Option<i64>,
    pub connected: bool,
    pub pull_error: Option<String>,
    pub alerts: Vec<Alert>,
}

impl DashboardFrame {
    pub fn build(
        store: &SnapshotStore,
        state: &AppState,
        policy: AlertPolicy,
        connected: bool,
        pull_status: &ChannelStatus,
        now_ms: i64,
    ) -> Self {
        let selection = state.selection();
        let key = selection.key();
        let stored = store.get(&key);
        let snapshot = stored.as_ref().map(|entry| entry.snapshot.clone());
        let last_updated_ms = snapshot.as_ref().map(|s| s.timestamp);

        let alerts = derive_alerts(
            policy,
            AlertInputs {
                snapshot: snapshot.as_deref(),
                last_updated_ms,
                now_ms,
                connected,
            },
        );

        Self {
            key,
            intersection_name: selection.name,
            source: stored.map(|entry| entry.source),
            snapshot,
            last_updated_ms,
            connected,
            pull_error: pull_status.error_message().map(str::to_string),
            alerts,
        }
    }
}

pub struct Monitor<B: BackendApi + 'static> {
    backend: Arc<B>,
    config: ClientConfig,
    store: SnapshotStore,
    state: AppState,
}

impl<B: BackendApi + 'static> Monitor<B> {
    pub fn new(backend: B, config: ClientConfig, state: AppState) -> Self {
        Self {
            backend: Arc::new(backend),
            config,
            store: SnapshotStore::new(),
            state,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub async fn once(&self) -> Result<DashboardFrame, ApiError> {
        let (_shutdown, rx) = watch::channel(false);
        let ctx = ChannelContext {
            state: self.state.clone(),
            shutdown: rx,
            refresh: Arc::new(Notify::new()),
        };
        let pull = PullChannel::new(self.backend.clone(), self.store.clone(), self.config.pull_interval);
        pull.poll_once(&ctx).await?;
        Ok(DashboardFrame::build(
            &self.store,
            &self.state,
            self.config.alert_policy,
            false,
            &ChannelStatus::ok(),
            Utc::now().timestamp_millis(),
        ))
    }

    pub fn start(&self) -> MonitorHandle {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let refresh = Arc::new(Notify::new());
        let ctx = ChannelContext {
            state: self.state.clone(),
            shutdown: shutdown_rx.clone(),
            refresh: refresh.clone(),
        };
        let mut tasks = Vec::new();

        let pull = PullChannel::new(self.backend.clone(), self.store.clone(), self.config.pull_interval);
        let pull_status = pull.status();
        tasks.push(tokio::spawn(pull.run(ctx.clone())));

        let connectivity = if self.config.stream_enabled {
            let push = PushChannel::new(self.backend.clone(), self.store.clone(), self.config.stream_retry);
            let rx = push.connectivity();
            tasks.push(tokio::spawn(push.run(shutdown_rx)));
            rx
        } else {
            watch::channel(false).1
        };

        let analytics = AnalyticsChannel::new(self.backend.clone(), self.config.analytics_interval);
        let datasets = analytics.datasets();
        let analytics_status = analytics.status();
        tasks.push(tokio::spawn(analytics.run(ctx)));

        info!(
            stream=self.config.stream_enabled,
            policy=?self.config.alert_policy,
            "monitor started"
        );

        MonitorHandle {
            store: self.store.clone(),
            state: self.state.clone(),
            policy: self.config.alert_policy,
            shutdown,
            refresh,
            tasks,
            connectivity,
            pull_status,
            datasets,
            analytics_status,
        }
    }
}

pub struct MonitorHandle {
    store: SnapshotStore,
    state: AppState,
    policy: AlertPolicy,
    shutdown: watch::Sender<bool>,
    refresh: Arc<Notify>,
    tasks: Vec<JoinHandle<()>>,
    connectivity: watch::Receiver<bool>,
    pull_status: watch::Receiver<ChannelStatus>,
    datasets: watch::Receiver<Option<AnalyticsView>>,
    analytics_status: watch::Receiver<ChannelStatus>,
}

impl MonitorHandle {
    pub fn connected(&self) -> bool {
        *self.connectivity.borrow()
    }

    pub fn watch_connectivity(&self) -> watch::Receiver<bool> {
        self.connectivity.clone()
    }

    pub fn pull_status(&self) -> ChannelStatus {
        self.pull_status.borrow().clone()
    }

    pub fn analytics(&self) -> Option<AnalyticsView> {
        self.datasets.borrow().clone()
    }

    pub fn analytics_status(&self) -> ChannelStatus {
        self.analytics_status.borrow().clone()
    }

    pub fn watch_store(&self) -> watch::Receiver<u64> {
        self.store.subscribe()
    }

    pub fn frame(&self, now_ms: i64) -> DashboardFrame {
        DashboardFrame::build(
            &self.store,
            &self.state,
            self.policy,
            self.connected(),
            &self.pull_status(),
            now_ms,
        )
    }

    pub fn refresh(&self) {
        self.refresh.notify_waiters();
    }

    pub async fn shutdown(self) {
        self.store.close();
        self.shutdown.send_replace(true);
        for task in self.tasks {
            let _ = task.await;
        }
        info!("monitor stopped");
    }
}
