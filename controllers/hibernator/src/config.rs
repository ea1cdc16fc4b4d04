//! Controller configuration from environment variables

use std::net::SocketAddr;
use std::time::Duration;

use crate::error::ControllerError;

const DEFAULT_MIN_RESYNC_INTERVAL_SECONDS: u64 = 60;
const DEFAULT_METRICS_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_ERROR_BACKOFF_MIN_MINUTES: u64 = 1;
const DEFAULT_ERROR_BACKOFF_MAX_MINUTES: u64 = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Namespace to watch; all namespaces when `None`
    pub namespace: Option<String>,
    pub min_resync_interval_seconds: u64,
    pub metrics_addr: SocketAddr,
    pub error_backoff_min_minutes: u64,
    pub error_backoff_max_minutes: u64,
}

impl ControllerConfig {
    /// Read configuration from the process environment
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through `lookup`
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ControllerError> {
        let value = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let number = |key: &str, default: u64| -> Result<u64, ControllerError> {
            value(key).map_or(Ok(default), |raw| {
                raw.parse::<u64>()
                    .map_err(|e| ControllerError::InvalidConfig(format!("{key}={raw:?}: {e}")))
            })
        };

        let metrics_addr = value("METRICS_ADDR")
            .unwrap_or_else(|| DEFAULT_METRICS_ADDR.to_string())
            .parse::<SocketAddr>()
            .map_err(|e| ControllerError::InvalidConfig(format!("METRICS_ADDR: {e}")))?;

        let config = Self {
            namespace: value("WATCH_NAMESPACE"),
            min_resync_interval_seconds: number("MIN_RESYNC_INTERVAL_SECONDS", DEFAULT_MIN_RESYNC_INTERVAL_SECONDS)?,
            metrics_addr,
            error_backoff_min_minutes: number("ERROR_BACKOFF_MIN_MINUTES", DEFAULT_ERROR_BACKOFF_MIN_MINUTES)?,
            error_backoff_max_minutes: number("ERROR_BACKOFF_MAX_MINUTES", DEFAULT_ERROR_BACKOFF_MAX_MINUTES)?,
        };

        if config.error_backoff_min_minutes == 0 {
            return Err(ControllerError::InvalidConfig(
                "ERROR_BACKOFF_MIN_MINUTES must be at least 1".to_string(),
            ));
        }
        if config.error_backoff_max_minutes < config.error_backoff_min_minutes {
            return Err(ControllerError::InvalidConfig(format!(
                "ERROR_BACKOFF_MAX_MINUTES ({}) is below ERROR_BACKOFF_MIN_MINUTES ({})",
                config.error_backoff_max_minutes, config.error_backoff_min_minutes
            )));
        }
        Ok(config)
    }

    /// Shortest requeue delay; also the debounce window between transitions
    #[must_use]
    pub fn requeue_floor(&self) -> Duration {
        Duration::from_secs(self.min_resync_interval_seconds + 1)
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            min_resync_interval_seconds: DEFAULT_MIN_RESYNC_INTERVAL_SECONDS,
            metrics_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            error_backoff_min_minutes: DEFAULT_ERROR_BACKOFF_MIN_MINUTES,
            error_backoff_max_minutes: DEFAULT_ERROR_BACKOFF_MAX_MINUTES,
        }
    }
}
