use std::env;
use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use crate::error::{SyncError, SyncResult};
use crate::mode_switch::DEFAULT_SETTLE_DELAY;
use crate::poll::DEFAULT_POLL_INTERVAL;
use crate::push::DEFAULT_RECONNECT_DELAY;
use crate::readings::DEFAULT_CAPACITY;
use crate::retry::RetryPolicy;

pub const DEFAULT_BACKEND_URL: &str = "http://localhost:8000";

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Backend base URL, without the `/api` prefix
    pub backend_url: String,
    /// Push channel endpoint; derived from the backend URL when unset
    pub ws_url: Option<String>,
    /// Seed file for format and position; `None` uses `~/.aligntester/state.toml`
    pub state_file: Option<PathBuf>,
    pub poll_interval: Duration,
    pub reconnect_delay: Duration,
    pub settle_delay: Duration,
    pub retry: RetryPolicy,
    pub ring_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            backend_url: DEFAULT_BACKEND_URL.to_string(),
            ws_url: None,
            state_file: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            settle_delay: DEFAULT_SETTLE_DELAY,
            retry: RetryPolicy::default(),
            ring_capacity: DEFAULT_CAPACITY,
        }
    }
}

impl ClientConfig {
    /// Load configuration from `ALIGNTESTER_*` environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(url) = lookup("ALIGNTESTER_BACKEND").filter(|value| !value.trim().is_empty()) {
            config.backend_url = url.trim().to_string();
        }
        config.ws_url = lookup("ALIGNTESTER_WS_URL").filter(|value| !value.trim().is_empty());
        config.state_file = lookup("ALIGNTESTER_STATE_FILE").map(PathBuf::from);
        if let Some(ms) = lookup("ALIGNTESTER_POLL_MS").and_then(|value| value.parse::<u64>().ok()) {
            config.poll_interval = Duration::from_millis(ms.max(100));
        }
        config
    }

    /// Push channel URL: explicit, or `ws(s)://<backend host>/ws`.
    pub fn push_url(&self) -> SyncResult<String> {
        if let Some(url) = &self.ws_url {
            return Ok(Url::parse(url)?.to_string());
        }
        let mut url = Url::parse(&self.backend_url)?;
        let scheme = match url.scheme() {
            "https" | "wss" => "wss",
            _ => "ws",
        };
        url.set_scheme(scheme)
            .map_err(|_| SyncError::PushUrl(self.backend_url.clone()))?;
        url.set_path("/ws");
        url.set_query(None);
        Ok(url.to_string())
    }
}
