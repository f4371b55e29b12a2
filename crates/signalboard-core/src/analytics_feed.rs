use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::analytics::{AnalyticsTracker, AnalyticsView};
use crate::backend::BackendApi;
use crate::channel::{wait_active, wait_shutdown, ChannelContext, ChannelStatus};
use crate::error::ApiError;
use crate::snapshot::EntityKey;
use crate::state::View;

pub struct AnalyticsChannel<B: BackendApi> {
    backend: Arc<B>,
    tracker: AnalyticsTracker,
    epoch: Option<u64>,
    view: watch::Sender<Option<AnalyticsView>>,
    status: watch::Sender<ChannelStatus>,
    interval: Duration,
}

impl<B: BackendApi> AnalyticsChannel<B> {
    pub fn new(backend: Arc<B>, interval: Duration) -> Self {
        Self {
            backend,
            tracker: AnalyticsTracker::new(),
            epoch: None,
            view: watch::Sender::new(None),
            status: watch::Sender::new(ChannelStatus::Idle),
            interval,
        }
    }

    pub fn datasets(&self) -> watch::Receiver<Option<AnalyticsView>> {
        self.view.subscribe()
    }

    pub fn status(&self) -> watch::Receiver<ChannelStatus> {
        self.status.subscribe()
    }

    /// Resets the trackers whenever the selection changed since the last
    /// sync, including a round trip that lands on the same key.
    pub fn sync_selection(&mut self, ctx: &ChannelContext) -> (EntityKey, u64) {
        let (key, epoch) = ctx.state.selected_key_with_epoch();
        if self.epoch != Some(epoch) || self.tracker.key() != Some(&key) {
            debug!(key=%key, epoch, "resetting analytics trackers");
            self.tracker.reset(key.clone());
            self.epoch = Some(epoch);
            self.view.send_replace(None);
        }
        (key, epoch)
    }

    pub async fn poll_once(&mut self, ctx: &ChannelContext) -> Result<(), ApiError> {
        let (key, epoch) = self.sync_selection(ctx);

        let overview = match self.backend.fetch_analytics(&key).await {
            Ok(overview) => overview,
            Err(err) => {
                warn!(key=%key, error=%err, "analytics fetch failed");
                self.status.send_replace(ChannelStatus::failed(err.to_string()));
                return Err(err);
            }
        };

        if ctx.state.selection_epoch() != epoch {
            debug!(key=%key, "discarding analytics for previous selection");
            return Ok(());
        }

        let datasets = self.tracker.observe(&key, &overview);
        debug!(
            key=%key,
            lanes=datasets.lane_keys.len(),
            transitions=datasets.total_transitions,
            events=datasets.events_analyzed,
            "analytics updated"
        );
        self.view.send_replace(Some(datasets));
        self.status.send_replace(ChannelStatus::ok());
        Ok(())
    }

    pub async fn run(mut self, ctx: ChannelContext) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut selection = ctx.state.watch_selection();
        let mut shutdown = ctx.shutdown.clone();
        let refresh = ctx.refresh.clone();
        info!(interval_ms=%self.interval.as_millis(), "analytics channel started");

        loop {
            tokio::select! {
                _ = wait_shutdown(&mut shutdown) => break,
                _ = wait_active(&ctx.state, View::needs_analytics) => {}
            }

            tokio::select! {
                _ = wait_shutdown(&mut shutdown) => break,
                _ = ticker.tick() => {}
                changed = selection.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    self.sync_selection(&ctx);
                }
                _ = refresh.notified() => {}
            }

            if !ctx.state.view().needs_analytics() {
                continue;
            }
            let _ = self.poll_once(&ctx).await;
        }

        info!("analytics channel stopped");
    }
}
