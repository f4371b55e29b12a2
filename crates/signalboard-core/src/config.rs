use std::path::PathBuf;
use std::time::Duration;

use crate::alerts::AlertPolicy;

pub const DEFAULT_BACKEND_URL: &str = "http://localhost:3000";
pub const DEFAULT_DETECTION_THRESHOLD_CM: f64 = 30.0;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub backend_url: String,
    pub pull_interval: Duration,
    pub analytics_interval: Duration,
    pub request_timeout: Duration,
    pub stream_retry: Duration,
    pub stream_enabled: bool,
    pub alert_policy: AlertPolicy,
    pub state_dir: PathBuf,
    pub supabase: Option<SupabaseConfig>,
    pub detection_threshold_cm: f64,
}

#[derive(Debug, Clone)]
pub struct SupabaseConfig {
    pub url: String,
    pub anon_key: String,
}

impl SupabaseConfig {
    /// Both values must be non-blank, otherwise history runs in degraded mode.
    pub fn from_parts(url: Option<String>, anon_key: Option<String>) -> Option<Self> {
        let url = url.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())?;
        let anon_key = anon_key
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())?;
        Some(Self { url, anon_key })
    }
}

impl ClientConfig {
    pub fn with_stream(mut self, enabled: bool) -> Self {
        self.stream_enabled = enabled;
        self.alert_policy = if enabled {
            AlertPolicy::ConnectivityPrimary
        } else {
            AlertPolicy::StalenessPrimary
        };
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            backend_url: DEFAULT_BACKEND_URL.to_string(),
            pull_interval: Duration::from_millis(2000),
            analytics_interval: Duration::from_millis(5000),
            request_timeout: Duration::from_secs(10),
            stream_retry: Duration::from_millis(3000),
            stream_enabled: true,
            alert_policy: AlertPolicy::ConnectivityPrimary,
            state_dir: PathBuf::from("./.signalboard"),
            supabase: None,
            detection_threshold_cm: DEFAULT_DETECTION_THRESHOLD_CM,
        }
    }
}
