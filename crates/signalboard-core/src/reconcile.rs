use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tracing::debug;

use crate::snapshot::{EntityKey, Snapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Apply { advance_to: Option<i64> },
    Reject,
}

/// `last_applied` is `None` until the first write for a key; `0` counts as
/// unset, matching producers that omit the timestamp. Once a real baseline
/// exists, a snapshot without a timestamp is treated as older than it.
pub fn reconcile(last_applied: Option<i64>, incoming: i64) -> Decision {
    let previous = match last_applied {
        None | Some(0) => {
            return Decision::Apply {
                advance_to: Some(incoming),
            }
        }
        Some(ts) => ts,
    };

    if incoming < previous {
        return Decision::Reject;
    }

    if incoming > previous {
        Decision::Apply {
            advance_to: Some(incoming),
        }
    } else {
        // Ties replace the value without moving the index.
        Decision::Apply { advance_to: None }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Pull,
    Push,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    Stale { current: i64, incoming: i64 },
    Closed,
}

#[derive(Debug, Clone)]
pub struct StoredSnapshot {
    pub snapshot: Arc<Snapshot>,
    pub source: Source,
    pub last_applied: i64,
}

#[derive(Debug, Default)]
struct StoreInner {
    entries: HashMap<EntityKey, StoredSnapshot>,
    closed: bool,
}

#[derive(Debug, Clone)]
pub struct SnapshotStore {
    inner: Arc<Mutex<StoreInner>>,
    revision: Arc<watch::Sender<u64>>,
}

impl Default for SnapshotStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotStore {
    pub fn new() -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            inner: Arc::new(Mutex::new(StoreInner::default())),
            revision: Arc::new(revision),
        }
    }

    pub fn apply(&self, key: &EntityKey, snapshot: Snapshot, source: Source) -> ApplyOutcome {
        // compare and write under one lock
        let mut inner = self.inner.lock();
        if inner.closed {
            debug!(key=%key, ?source, "store closed, dropping snapshot");
            return ApplyOutcome::Closed;
        }

        let incoming = snapshot.timestamp;
        let last_applied = inner.entries.get(key).map(|entry| entry.last_applied);

        match reconcile(last_applied, incoming) {
            Decision::Reject => {
                let current = last_applied.unwrap_or_default();
                debug!(key=%key, ?source, current, incoming, "stale snapshot rejected");
                ApplyOutcome::Stale { current, incoming }
            }
            Decision::Apply { advance_to } => {
                let last_applied = advance_to.or(last_applied).unwrap_or_default();
                inner.entries.insert(
                    key.clone(),
                    StoredSnapshot {
                        snapshot: Arc::new(snapshot),
                        source,
                        last_applied,
                    },
                );
                drop(inner);
                self.revision.send_modify(|rev| *rev += 1);
                ApplyOutcome::Applied
            }
        }
    }

    pub fn get(&self, key: &EntityKey) -> Option<StoredSnapshot> {
        self.inner.lock().entries.get(key).cloned()
    }

    pub fn last_applied(&self, key: &EntityKey) -> Option<i64> {
        self.inner.lock().entries.get(key).map(|entry| entry.last_applied)
    }

    pub fn keys(&self) -> Vec<EntityKey> {
        let mut keys: Vec<_> = self.inner.lock().entries.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    /// Late results from in-flight requests are dropped after this.
    pub fn close(&self) {
        self.inner.lock().closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }
}
