//! # vizora-device
//!
//! Resilience core of a Vizora playback device:
//!
//! - [`cache`]: local copies of scheduled content under a size budget
//! - [`queue`]: durable, ordered, deduplicated delivery of device events
//! - [`connectivity`]: the online/offline signal both of them follow
//! - [`pairing`]: turning an anonymous device into a paired display
//! - [`agent`]: the boot sequence tying them together

pub mod agent;
pub mod cache;
pub mod config;
pub mod connectivity;
pub mod error;
pub mod pairing;
pub mod queue;

pub use agent::Agent;
pub use config::DeviceConfig;
pub use error::{ConfigError, DeviceError};
