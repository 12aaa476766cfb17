//! On-disk index of cached content.
//!
//! The manifest is rewritten wholesale on every mutation: serialized to a
//! temporary sibling file and renamed over the old one, so a crash leaves
//! either the previous or the new manifest, never a torn one.

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use vizora_shared::constants::MANIFEST_VERSION;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub content_id: String,
    /// File name inside the cache directory.
    pub file_name: String,
    pub size_bytes: u64,
    pub mime_type: String,
    pub downloaded_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheManifest {
    pub version: u32,
    pub entries: HashMap<String, CacheEntry>,
}

impl Default for CacheManifest {
    fn default() -> Self {
        Self {
            version: MANIFEST_VERSION,
            entries: HashMap::new(),
        }
    }
}

impl CacheManifest {
    pub fn total_size_bytes(&self) -> u64 {
        self.entries.values().map(|e| e.size_bytes).sum()
    }

    /// Entries ordered from least to most recently accessed.
    pub fn lru_order(&self) -> Vec<&CacheEntry> {
        let mut entries: Vec<&CacheEntry> = self.entries.values().collect();
        entries.sort_by(|a, b| {
            a.last_accessed
                .cmp(&b.last_accessed)
                .then_with(|| a.content_id.cmp(&b.content_id))
        });
        entries
    }

    /// Read the manifest at `path`. A missing, unreadable, malformed or
    /// foreign-version manifest yields an empty one.
    pub async fn load(path: &Path) -> Self {
        let raw = match tokio::fs::read(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No cache manifest yet");
                return Self::default();
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read cache manifest, starting empty");
                return Self::default();
            }
        };

        match serde_json::from_slice::<CacheManifest>(&raw) {
            Ok(manifest) if manifest.version == MANIFEST_VERSION => manifest,
            Ok(manifest) => {
                warn!(
                    version = manifest.version,
                    expected = MANIFEST_VERSION,
                    "Unknown cache manifest version, starting empty"
                );
                Self::default()
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Corrupt cache manifest, starting empty");
                Self::default()
            }
        }
    }

    /// Atomically replace the manifest at `path`.
    pub async fn save(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_vec_pretty(self)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &json).await?;
        tokio::fs::rename(&tmp, path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn entry(id: &str, size: u64, accessed: DateTime<Utc>) -> CacheEntry {
        CacheEntry {
            content_id: id.to_string(),
            file_name: format!("{id}.bin"),
            size_bytes: size,
            mime_type: "application/octet-stream".to_string(),
            downloaded_at: accessed,
            last_accessed: accessed,
        }
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.json");
        let now = Utc::now();

        let mut manifest = CacheManifest::default();
        manifest.entries.insert("a".into(), entry("a", 10, now));
        manifest.save(&path).await.unwrap();

        assert_eq!(CacheManifest::load(&path).await, manifest);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn test_corrupt_or_foreign_manifest_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.json");

        tokio::fs::write(&path, b"{ truncated").await.unwrap();
        assert!(CacheManifest::load(&path).await.entries.is_empty());

        tokio::fs::write(&path, br#"{"version":99,"entries":{}}"#)
            .await
            .unwrap();
        assert_eq!(CacheManifest::load(&path).await, CacheManifest::default());

        let missing = dir.path().join("nothing.json");
        assert!(CacheManifest::load(&missing).await.entries.is_empty());
    }

    #[test]
    fn test_lru_order_is_oldest_first() {
        let now = Utc::now();
        let mut manifest = CacheManifest::default();
        manifest.entries.insert("new".into(), entry("new", 1, now));
        manifest
            .entries
            .insert("old".into(), entry("old", 2, now - Duration::hours(2)));
        manifest
            .entries
            .insert("mid".into(), entry("mid", 3, now - Duration::hours(1)));

        let order: Vec<&str> = manifest
            .lru_order()
            .iter()
            .map(|e| e.content_id.as_str())
            .collect();
        assert_eq!(order, ["old", "mid", "new"]);
        assert_eq!(manifest.total_size_bytes(), 6);
    }
}
