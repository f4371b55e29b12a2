use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{watch, Notify};

use crate::state::{AppState, View};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum ChannelStatus {
    Idle,
    Ok { at_ms: i64 },
    Failed { message: String, at_ms: i64 },
}

impl ChannelStatus {
    pub fn ok() -> Self {
        ChannelStatus::Ok {
            at_ms: Utc::now().timestamp_millis(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        ChannelStatus::Failed {
            message: message.into(),
            at_ms: Utc::now().timestamp_millis(),
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            ChannelStatus::Failed { message, .. } => Some(message),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChannelContext {
    pub state: AppState,
    pub shutdown: watch::Receiver<bool>,
    pub refresh: Arc<Notify>,
}

impl ChannelContext {
    pub fn is_shutdown(&self) -> bool {
        *self.shutdown.borrow()
    }
}

pub async fn wait_shutdown(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

/// Resolves once `active(view, auto_refresh)` holds.
pub async fn wait_active(state: &AppState, active: fn(View) -> bool) {
    let mut view = state.watch_view();
    let mut auto = state.watch_auto_refresh();
    loop {
        if active(*view.borrow_and_update()) && *auto.borrow_and_update() {
            return;
        }
        tokio::select! {
            changed = view.changed() => if changed.is_err() { return },
            changed = auto.changed() => if changed.is_err() { return },
        }
    }
}
