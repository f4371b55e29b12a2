use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::backend::BackendApi;
use crate::channel::{wait_active, wait_shutdown, ChannelContext, ChannelStatus};
use crate::error::ApiError;
use crate::reconcile::{ApplyOutcome, SnapshotStore, Source};
use crate::state::View;

pub struct PullChannel<B: BackendApi> {
    backend: Arc<B>,
    store: SnapshotStore,
    status: watch::Sender<ChannelStatus>,
    interval: Duration,
}

impl<B: BackendApi> PullChannel<B> {
    pub fn new(backend: Arc<B>, store: SnapshotStore, interval: Duration) -> Self {
        Self {
            backend,
            store,
            status: watch::Sender::new(ChannelStatus::Idle),
            interval,
        }
    }

    pub fn status(&self) -> watch::Receiver<ChannelStatus> {
        self.status.subscribe()
    }

    pub async fn poll_once(&self, ctx: &ChannelContext) -> Result<ApplyOutcome, ApiError> {
        let key = ctx.state.selected_key();
        match self.backend.fetch_snapshot(&key).await {
            Ok(snapshot) => {
                let ts = snapshot.timestamp;
                let outcome = self.store.apply(&key, snapshot, Source::Pull);
                debug!(key=%key, ts, ?outcome, "pull resolved");
                self.status.send_replace(ChannelStatus::ok());
                Ok(outcome)
            }
            Err(err) => {
                warn!(key=%key, error=%err, "snapshot fetch failed");
                self.status.send_replace(ChannelStatus::failed(err.to_string()));
                Err(err)
            }
        }
    }

    pub async fn run(self, ctx: ChannelContext) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut selection = ctx.state.watch_selection();
        let mut shutdown = ctx.shutdown.clone();
        let refresh = ctx.refresh.clone();
        info!(interval_ms=%self.interval.as_millis(), "pull channel started");

        loop {
            if ctx.is_shutdown() {
                break;
            }

            // Suspended, not torn down: the ticker keeps its cadence.
            tokio::select! {
                _ = wait_shutdown(&mut shutdown) => break,
                _ = wait_active(&ctx.state, View::needs_realtime) => {}
            }

            tokio::select! {
                _ = wait_shutdown(&mut shutdown) => break,
                _ = ticker.tick() => {}
                changed = selection.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    debug!(key=%ctx.state.selected_key(), "selection changed, fetching now");
                }
                _ = refresh.notified() => {}
            }

            if !ctx.state.view().needs_realtime() {
                continue;
            }
            let _ = self.poll_once(&ctx).await;
        }

        info!("pull channel stopped");
    }
}
