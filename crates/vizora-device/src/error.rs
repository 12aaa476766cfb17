use thiserror::Error;

/// A configuration value the agent cannot run with.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{field} must not be empty")]
    Empty { field: &'static str },

    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("invalid URL for {field}: {reason}")]
    InvalidUrl { field: &'static str, reason: String },
}

/// Top-level failures of the device agent.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("storage error: {0}")]
    Store(#[from] vizora_store::StoreError),

    #[error("content cache error: {0}")]
    Cache(#[from] crate::cache::CacheError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pairing failed: {0}")]
    Pairing(String),
}
