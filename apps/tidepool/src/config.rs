use std::env;
use std::time::Duration;

use tidepool_core::{parse_flag, ViewportGeometry};

use crate::fit::DEFAULT_FIT_SCHEDULE;
use crate::supervisor::ReconnectPolicy;

pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:19080";

/// Client tuning knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Upper bound on a single connect attempt.
    pub open_timeout: Duration,
    /// Resize coalescing window; zero sends every change.
    pub resize_coalesce: Duration,
    /// Fallback re-measure delays after a refit request.
    pub fit_schedule: Vec<Duration>,
    pub reconnect: ReconnectPolicy,
    /// Geometry announced before the surface has been measured.
    pub initial_geometry: ViewportGeometry,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            open_timeout: Duration::from_secs(5),
            resize_coalesce: Duration::from_millis(16),
            fit_schedule: DEFAULT_FIT_SCHEDULE.to_vec(),
            reconnect: ReconnectPolicy::default(),
            initial_geometry: ViewportGeometry::default(),
        }
    }
}

impl ClientConfig {
    /// Defaults overridden by `TIDEPOOL_OPEN_TIMEOUT_MS`,
    /// `TIDEPOOL_RESIZE_COALESCE_MS` and `TIDEPOOL_NO_RECONNECT`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let millis = |key: &str| {
            lookup(key)
                .and_then(|value| value.trim().parse::<u64>().ok())
                .map(Duration::from_millis)
        };
        let mut config = Self::default();
        if let Some(timeout) = millis("TIDEPOOL_OPEN_TIMEOUT_MS").filter(|d| !d.is_zero()) {
            config.open_timeout = timeout;
        }
        if let Some(window) = millis("TIDEPOOL_RESIZE_COALESCE_MS") {
            config.resize_coalesce = window;
        }
        if lookup("TIDEPOOL_NO_RECONNECT").is_some_and(|value| parse_flag(&value)) {
            config.reconnect = ReconnectPolicy::disabled();
        }
        config
    }
}
