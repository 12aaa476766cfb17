//! Device agent configuration loaded from environment variables.
//!
//! Every setting has a default so a freshly flashed device can boot with no
//! configuration beyond the backend URL.

use std::path::PathBuf;
use std::time::Duration;

use vizora_shared::constants::{
    DEFAULT_CACHE_MAX_MB, DEFAULT_DEDUPE_WINDOW_SECS, DEFAULT_MAX_QUEUE_SIZE, DEFAULT_MAX_RETRIES,
    DEFAULT_RETRY_DELAY_MS,
};

use vizora_shared::types::DeviceInfo;

use crate::cache::CacheConfig;
use crate::error::ConfigError;
use crate::queue::QueueConfig;

#[derive(Debug, Clone)]
pub struct DeviceConfig {
    /// Base URL of the Vizora backend.
    /// Env: `VIZORA_API_URL`
    /// Default: `http://localhost:8080`
    pub api_url: String,

    /// Directory for the database and the content cache. `None` uses the
    /// platform data directory.
    /// Env: `VIZORA_DATA_DIR`
    pub data_dir: Option<PathBuf>,

    /// Stable identifier this device reports when pairing.
    /// Env: `VIZORA_DEVICE_ID`
    /// Default: `HOSTNAME`, else `vizora-device`
    pub device_id: String,

    /// Display name shown in the dashboard.
    /// Env: `VIZORA_DEVICE_NAME`
    /// Default: same as `device_id`
    pub device_name: String,

    /// Content cache budget in megabytes.
    /// Env: `VIZORA_CACHE_MAX_MB`
    /// Default: `500`
    pub cache_max_mb: u64,

    /// Env: `VIZORA_QUEUE_MAX_SIZE`
    /// Default: `100`
    pub max_queue_size: usize,

    /// Env: `VIZORA_QUEUE_DEDUPE_WINDOW_SECS`
    /// Default: `60`
    pub dedupe_window: Duration,

    /// Env: `VIZORA_QUEUE_MAX_RETRIES`
    /// Default: `5`
    pub max_retries: u32,

    /// Base delay for queue retry backoff.
    /// Env: `VIZORA_QUEUE_RETRY_DELAY_MS`
    /// Default: `2000`
    pub retry_delay: Duration,

    /// How often the queue retries backed-off actions without a new trigger.
    /// Env: `VIZORA_QUEUE_RETRY_TICK_SECS`
    /// Default: `30`
    pub retry_tick: Duration,

    /// Interval of the connectivity probe against `/health`.
    /// Env: `VIZORA_HEALTH_INTERVAL_SECS`
    /// Default: `15`
    pub health_interval: Duration,

    /// Interval between credential polls while waiting to be paired.
    /// Env: `VIZORA_PAIRING_POLL_SECS`
    /// Default: `3`
    pub pairing_poll_interval: Duration,

    /// Timeout applied to every HTTP request.
    /// Env: `VIZORA_REQUEST_TIMEOUT_SECS`
    /// Default: `30`
    pub request_timeout: Duration,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        let device_id = "vizora-device".to_string();
        Self {
            api_url: "http://localhost:8080".to_string(),
            data_dir: None,
            device_name: device_id.clone(),
            device_id,
            cache_max_mb: DEFAULT_CACHE_MAX_MB,
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            dedupe_window: Duration::from_secs(DEFAULT_DEDUPE_WINDOW_SECS),
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
            retry_tick: Duration::from_secs(30),
            health_interval: Duration::from_secs(15),
            pairing_poll_interval: Duration::from_secs(3),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl DeviceConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(url) = lookup("VIZORA_API_URL") {
            config.api_url = url.trim().trim_end_matches('/').to_string();
        }

        if let Some(dir) = lookup("VIZORA_DATA_DIR") {
            if !dir.trim().is_empty() {
                config.data_dir = Some(PathBuf::from(dir));
            }
        }

        if let Some(id) = lookup("VIZORA_DEVICE_ID").or_else(|| lookup("HOSTNAME")) {
            if !id.trim().is_empty() {
                config.device_id = id.trim().to_string();
            }
        }
        config.device_name = lookup("VIZORA_DEVICE_NAME")
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| config.device_id.clone());

        if let Some(mb) = parse_var(&lookup, "VIZORA_CACHE_MAX_MB") {
            config.cache_max_mb = mb;
        }
        if let Some(n) = parse_var(&lookup, "VIZORA_QUEUE_MAX_SIZE") {
            config.max_queue_size = n;
        }
        if let Some(secs) = parse_var(&lookup, "VIZORA_QUEUE_DEDUPE_WINDOW_SECS") {
            config.dedupe_window = Duration::from_secs(secs);
        }
        if let Some(n) = parse_var(&lookup, "VIZORA_QUEUE_MAX_RETRIES") {
            config.max_retries = n;
        }
        if let Some(ms) = parse_var(&lookup, "VIZORA_QUEUE_RETRY_DELAY_MS") {
            config.retry_delay = Duration::from_millis(ms);
        }
        if let Some(secs) = parse_var(&lookup, "VIZORA_QUEUE_RETRY_TICK_SECS") {
            config.retry_tick = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var(&lookup, "VIZORA_HEALTH_INTERVAL_SECS") {
            config.health_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var(&lookup, "VIZORA_PAIRING_POLL_SECS") {
            config.pairing_poll_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var(&lookup, "VIZORA_REQUEST_TIMEOUT_SECS") {
            config.request_timeout = Duration::from_secs(secs);
        }

        config
    }

    /// Reject values the agent cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_url.is_empty() {
            return Err(ConfigError::Empty { field: "api_url" });
        }
        match reqwest::Url::parse(&self.api_url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            Ok(url) => {
                return Err(ConfigError::InvalidUrl {
                    field: "api_url",
                    reason: format!("unsupported scheme {}", url.scheme()),
                })
            }
            Err(e) => {
                return Err(ConfigError::InvalidUrl {
                    field: "api_url",
                    reason: e.to_string(),
                })
            }
        }

        if self.device_id.is_empty() {
            return Err(ConfigError::Empty { field: "device_id" });
        }

        let positive = [
            ("cache_max_mb", self.cache_max_mb == 0),
            ("max_queue_size", self.max_queue_size == 0),
            ("max_retries", self.max_retries == 0),
            ("retry_tick", self.retry_tick.is_zero()),
            ("health_interval", self.health_interval.is_zero()),
            ("pairing_poll_interval", self.pairing_poll_interval.is_zero()),
            ("request_timeout", self.request_timeout.is_zero()),
        ];
        if let Some((field, _)) = positive.into_iter().find(|(_, zero)| *zero) {
            return Err(ConfigError::Zero { field });
        }

        Ok(())
    }

    pub fn cache(&self) -> CacheConfig {
        CacheConfig {
            max_size_bytes: self.cache_max_mb.saturating_mul(1024 * 1024),
        }
    }

    /// Identity registered with the backend during pairing.
    pub fn device_info(&self) -> DeviceInfo {
        DeviceInfo {
            device_id: self.device_id.clone(),
            name: self.device_name.clone(),
            metadata: serde_json::json!({
                "os": std::env::consts::OS,
                "arch": std::env::consts::ARCH,
                "agent_version": env!("CARGO_PKG_VERSION"),
            }),
        }
    }

    pub fn queue(&self) -> QueueConfig {
        QueueConfig {
            max_queue_size: self.max_queue_size,
            dedupe_window: self.dedupe_window,
            max_retries: self.max_retries,
            retry_delay: self.retry_delay,
        }
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Invalid value, using default");
            None
        }
    }
}
