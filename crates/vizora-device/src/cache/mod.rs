//! Device-side content cache.
//!
//! Guarantees a local copy of scheduled content before playback and keeps
//! the total size under a byte budget by evicting least recently used items.

pub mod fetch;
pub mod manager;
pub mod manifest;

pub use fetch::{ContentFetcher, FetchError, HttpFetcher};
pub use manager::{CacheConfig, CacheError, CacheStats, ContentCacheManager, DownloadOutcome};
pub use manifest::{CacheEntry, CacheManifest};
