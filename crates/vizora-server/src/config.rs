//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::time::Duration;

use vizora_shared::constants::{
    DEFAULT_HTTP_PORT, DEFAULT_PAIRING_TTL_SECS, DEFAULT_SWEEP_INTERVAL_SECS,
    PAIRING_CODE_LENGTH, SUBSCRIBER_BUFFER,
};

use crate::error::ServerError;
use crate::pairing::PairingConfig;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP (axum) API server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// Lifetime of a pairing code.
    /// Env: `PAIRING_CODE_TTL_SECS`
    /// Default: `600`
    pub pairing_ttl: Duration,

    /// Interval between expiry sweeps.
    /// Env: `PAIRING_SWEEP_INTERVAL_SECS`
    /// Default: `60`
    pub sweep_interval: Duration,

    /// Characters per pairing code.
    /// Env: `PAIRING_CODE_LENGTH`
    /// Default: `6`
    pub code_length: usize,

    /// Per-connection buffer of pending pairing updates. Updates beyond it
    /// are dropped for that connection.
    /// Env: `SUBSCRIBER_BUFFER`
    /// Default: `16`
    pub subscriber_buffer: usize,

    /// Human-readable name reported by `/info`.
    /// Env: `INSTANCE_NAME`
    /// Default: `"Vizora Pairing"`
    pub instance_name: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            pairing_ttl: Duration::from_secs(DEFAULT_PAIRING_TTL_SECS),
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            code_length: PAIRING_CODE_LENGTH,
            subscriber_buffer: SUBSCRIBER_BUFFER,
            instance_name: "Vizora Pairing".to_string(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = lookup("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        if let Some(secs) = parse_var::<u64>(&lookup, "PAIRING_CODE_TTL_SECS") {
            config.pairing_ttl = Duration::from_secs(secs);
        }

        if let Some(secs) = parse_var::<u64>(&lookup, "PAIRING_SWEEP_INTERVAL_SECS") {
            config.sweep_interval = Duration::from_secs(secs);
        }

        if let Some(len) = parse_var::<usize>(&lookup, "PAIRING_CODE_LENGTH") {
            config.code_length = len;
        }

        if let Some(n) = parse_var::<usize>(&lookup, "SUBSCRIBER_BUFFER") {
            config.subscriber_buffer = n;
        }

        if let Some(name) = lookup("INSTANCE_NAME") {
            config.instance_name = name;
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }

    /// Reject values the server cannot run with.
    pub fn validate(&self) -> Result<(), ServerError> {
        if self.pairing_ttl.is_zero() {
            return Err(ServerError::Config("pairing TTL must be positive".into()));
        }
        if self.sweep_interval.is_zero() {
            return Err(ServerError::Config("sweep interval must be positive".into()));
        }
        if !(4..=12).contains(&self.code_length) {
            return Err(ServerError::Config(format!(
                "pairing code length must be between 4 and 12, got {}",
                self.code_length
            )));
        }
        if self.subscriber_buffer == 0 {
            return Err(ServerError::Config("subscriber buffer must be positive".into()));
        }
        Ok(())
    }

    pub fn pairing(&self) -> Result<PairingConfig, ServerError> {
        let code_ttl = chrono::Duration::from_std(self.pairing_ttl)
            .map_err(|e| ServerError::Config(format!("pairing TTL out of range: {e}")))?;

        Ok(PairingConfig {
            code_ttl,
            code_length: self.code_length,
        })
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.http_addr, ([0, 0, 0, 0], 8080).into());
        assert_eq!(config.pairing_ttl, Duration::from_secs(600));
        assert_eq!(config.sweep_interval, Duration::from_secs(60));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_overrides_from_env() {
        let config = ServerConfig::from_lookup(lookup_from(&[
            ("HTTP_ADDR", "127.0.0.1:9000"),
            ("PAIRING_CODE_TTL_SECS", "120"),
            ("PAIRING_CODE_LENGTH", "8"),
            ("INSTANCE_NAME", "Lobby"),
        ]));

        assert_eq!(config.http_addr, ([127, 0, 0, 1], 9000).into());
        assert_eq!(config.pairing_ttl, Duration::from_secs(120));
        assert_eq!(config.code_length, 8);
        assert_eq!(config.instance_name, "Lobby");
        assert_eq!(config.pairing().unwrap().code_ttl, chrono::Duration::minutes(2));
    }

    #[test]
    fn test_invalid_values_keep_defaults() {
        let config = ServerConfig::from_lookup(lookup_from(&[
            ("HTTP_ADDR", "not an address"),
            ("PAIRING_SWEEP_INTERVAL_SECS", "soon"),
        ]));

        assert_eq!(config.http_addr, ([0, 0, 0, 0], 8080).into());
        assert_eq!(config.sweep_interval, Duration::from_secs(60));
    }

    #[test]
    fn test_validate_rejects_impossible_values() {
        let config = ServerConfig {
            pairing_ttl: Duration::ZERO,
            ..ServerConfig::default()
        };
        assert!(matches!(config.validate(), Err(ServerError::Config(_))));

        let config = ServerConfig {
            code_length: 2,
            ..ServerConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
