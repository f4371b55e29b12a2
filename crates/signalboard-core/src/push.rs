use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::backend::{BackendApi, ByteStream};
use crate::channel::wait_shutdown;
use crate::reconcile::{ApplyOutcome, SnapshotStore, Source};
use crate::snapshot::{EntityKey, Snapshot};
use crate::sse::{SseDecoder, SseEvent};

pub const TRAFFIC_STATE_EVENT: &str = "traffic-state";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    Ignored,
    DecodeFailed,
    Reconciled { key: EntityKey, outcome: ApplyOutcome },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamEnd {
    Shutdown,
    Closed,
    Failed,
}

pub struct PushChannel<B: BackendApi> {
    backend: Arc<B>,
    store: SnapshotStore,
    connected: watch::Sender<bool>,
    retry: Duration,
}

impl<B: BackendApi> PushChannel<B> {
    pub fn new(backend: Arc<B>, store: SnapshotStore, retry: Duration) -> Self {
        Self {
            backend,
            store,
            connected: watch::Sender::new(false),
            retry,
        }
    }

    pub fn connectivity(&self) -> watch::Receiver<bool> {
        self.connected.subscribe()
    }

    /// Decode failures are logged and swallowed; connectivity is untouched.
    pub fn handle_event(&self, event: &SseEvent) -> PushOutcome {
        if event.event != TRAFFIC_STATE_EVENT {
            debug!(event=%event.event, "ignoring stream event");
            return PushOutcome::Ignored;
        }

        let snapshot: Snapshot = match serde_json::from_str(&event.data) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!(error=%err, "could not decode traffic-state payload");
                return PushOutcome::DecodeFailed;
            }
        };

        let key = snapshot.entity_key();
        let outcome = self.store.apply(&key, snapshot, Source::Push);
        PushOutcome::Reconciled { key, outcome }
    }

    fn set_connected(&self, connected: bool) {
        self.connected.send_if_modified(|current| {
            let changed = *current != connected;
            *current = connected;
            changed
        });
    }

    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("push channel started");

        loop {
            let opened = tokio::select! {
                _ = wait_shutdown(&mut shutdown) => break,
                opened = self.backend.open_stream() => opened,
            };

            match opened {
                Ok(stream) => {
                    info!("event stream open");
                    self.set_connected(true);
                    let end = self.pump(stream, &mut shutdown).await;
                    self.set_connected(false);
                    if end == StreamEnd::Shutdown {
                        break;
                    }
                    warn!(?end, retry_ms=%self.retry.as_millis(), "event stream ended");
                }
                Err(err) => {
                    warn!(error=%err, retry_ms=%self.retry.as_millis(), "event stream unavailable");
                    self.set_connected(false);
                }
            }

            tokio::select! {
                _ = wait_shutdown(&mut shutdown) => break,
                _ = sleep(self.retry) => {}
            }
        }

        // Teardown always reports disconnected, whatever the last transition was.
        self.connected.send_replace(false);
        info!("push channel stopped");
    }

    async fn pump(
        &mut self,
        mut stream: Box<dyn ByteStream>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> StreamEnd {
        let mut decoder = SseDecoder::new();
        loop {
            let chunk = tokio::select! {
                _ = wait_shutdown(shutdown) => return StreamEnd::Shutdown,
                chunk = stream.next_chunk() => chunk,
            };

            match chunk {
                Ok(Some(bytes)) => {
                    for event in decoder.push(&bytes) {
                        self.handle_event(&event);
                    }
                    if let Some(retry) = decoder.retry() {
                        self.retry = retry;
                    }
                }
                Ok(None) => return StreamEnd::Closed,
                Err(err) => {
                    warn!(error=%err, "event stream read failed");
                    return StreamEnd::Failed;
                }
            }
        }
    }
}
