use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};

use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use vizora_shared::clock::Clock;

use super::fetch::{ContentFetcher, FetchError};
use super::manifest::{CacheEntry, CacheManifest};

const CACHE_DIR_NAME: &str = "content-cache";
const MANIFEST_FILE: &str = "manifest.json";
const PART_SUFFIX: &str = "part";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    pub max_size_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// Fetched and stored at the given path.
    Downloaded(PathBuf),
    /// Already cached; counted as an access.
    Hit(PathBuf),
    /// Another call is fetching the same id right now.
    InFlight,
    /// Fetch or write failed; nothing was stored. Play from the network.
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub item_count: usize,
    pub total_size_bytes: u64,
    pub max_size_bytes: u64,
}

/// Keeps local copies of remote content under a byte budget, evicting the
/// least recently used items first.
pub struct ContentCacheManager {
    cache_dir: PathBuf,
    manifest_path: PathBuf,
    config: CacheConfig,
    manifest: Mutex<CacheManifest>,
    in_flight: Arc<StdMutex<HashSet<String>>>,
    fetcher: Arc<dyn ContentFetcher>,
    clock: Arc<dyn Clock>,
}

/// Membership of one id in the in-flight set, released on drop.
struct InFlightGuard {
    set: Arc<StdMutex<HashSet<String>>>,
    id: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut set = self.set.lock().unwrap_or_else(|e| e.into_inner());
        set.remove(&self.id);
    }
}

impl ContentCacheManager {
    pub fn new(
        data_dir: &Path,
        config: CacheConfig,
        fetcher: Arc<dyn ContentFetcher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let cache_dir = data_dir.join(CACHE_DIR_NAME);
        Self {
            manifest_path: cache_dir.join(MANIFEST_FILE),
            cache_dir,
            config,
            manifest: Mutex::new(CacheManifest::default()),
            in_flight: Arc::new(StdMutex::new(HashSet::new())),
            fetcher,
            clock,
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Create the cache directory and load the manifest. Files the manifest
    /// does not reference are deleted so disk usage matches the accounting.
    pub async fn init(&self) -> Result<(), CacheError> {
        tokio::fs::create_dir_all(&self.cache_dir).await?;

        let loaded = CacheManifest::load(&self.manifest_path).await;
        self.remove_unreferenced_files(&loaded).await;
        info!(
            dir = %self.cache_dir.display(),
            items = loaded.entries.len(),
            bytes = loaded.total_size_bytes(),
            "Content cache ready"
        );
        *self.manifest.lock().await = loaded;
        Ok(())
    }

    pub async fn download_content(&self, id: &str, url: &str, mime_type: &str) -> DownloadOutcome {
        let Some(_guard) = self.begin_fetch(id) else {
            debug!(content_id = %id, "Download already in flight");
            return DownloadOutcome::InFlight;
        };

        if let Some(path) = self.get_cached_uri(id).await {
            return DownloadOutcome::Hit(path);
        }

        let file_name = format!(
            "{}-{}.{}",
            sanitize_id(id),
            Uuid::new_v4().simple(),
            file_extension(url, mime_type)
        );
        let path = self.cache_dir.join(&file_name);
        let part = self.cache_dir.join(format!("{file_name}.{PART_SUFFIX}"));

        let size_bytes = match self.fetch_into(url, &part, &path).await {
            Ok(size) => size,
            Err(e) => {
                error!(content_id = %id, url = %url, error = %e, "Failed to cache content");
                remove_if_present(&part).await;
                remove_if_present(&path).await;
                return DownloadOutcome::Failed;
            }
        };

        let now = self.clock.now();
        {
            let mut manifest = self.manifest.lock().await;
            let previous = manifest.entries.insert(
                id.to_string(),
                CacheEntry {
                    content_id: id.to_string(),
                    file_name,
                    size_bytes,
                    mime_type: mime_type.to_string(),
                    downloaded_at: now,
                    last_accessed: now,
                },
            );
            if let Some(previous) = previous {
                remove_if_present(&self.cache_dir.join(previous.file_name)).await;
            }
            self.persist(&manifest).await;
        }

        info!(content_id = %id, size_bytes, "Cached content");

        self.enforce_max_cache_size().await;

        if self.manifest.lock().await.entries.contains_key(id) {
            DownloadOutcome::Downloaded(path)
        } else {
            warn!(
                content_id = %id,
                size_bytes,
                max_size_bytes = self.config.max_size_bytes,
                "Content larger than the cache budget was evicted immediately"
            );
            DownloadOutcome::Failed
        }
    }

    /// Path of the cached copy of `id`, if its file still exists. Counts as an
    /// access for eviction purposes.
    pub async fn get_cached_uri(&self, id: &str) -> Option<PathBuf> {
        let mut manifest = self.manifest.lock().await;
        let path = self.cache_dir.join(&manifest.entries.get(id)?.file_name);

        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            if let Some(entry) = manifest.entries.get_mut(id) {
                entry.last_accessed = self.clock.now();
            }
            self.persist(&manifest).await;
            Some(path)
        } else {
            warn!(content_id = %id, path = %path.display(), "Cached file missing, pruning entry");
            manifest.entries.remove(id);
            self.persist(&manifest).await;
            None
        }
    }

    /// Evict least recently used items until the cache fits its budget.
    /// Returns the number of evicted items.
    pub async fn enforce_max_cache_size(&self) -> usize {
        let mut manifest = self.manifest.lock().await;
        let max = self.config.max_size_bytes;
        let mut total = manifest.total_size_bytes();
        if total <= max {
            return 0;
        }

        let victims: Vec<(String, String, u64)> = manifest
            .lru_order()
            .into_iter()
            .map(|e| (e.content_id.clone(), e.file_name.clone(), e.size_bytes))
            .collect();

        let mut evicted = 0;
        for (content_id, file_name, size_bytes) in victims {
            if total <= max {
                break;
            }
            remove_if_present(&self.cache_dir.join(&file_name)).await;
            manifest.entries.remove(&content_id);
            total = total.saturating_sub(size_bytes);
            evicted += 1;
            debug!(content_id = %content_id, size_bytes, "Evicted (LRU)");
        }

        self.persist(&manifest).await;
        info!(evicted, total_size_bytes = total, max_size_bytes = max, "Cache trimmed to budget");
        evicted
    }

    /// Drop one item and its file. Returns `false` if it was not cached.
    pub async fn remove_item(&self, id: &str) -> bool {
        let mut manifest = self.manifest.lock().await;
        let Some(entry) = manifest.entries.remove(id) else {
            return false;
        };
        remove_if_present(&self.cache_dir.join(&entry.file_name)).await;
        self.persist(&manifest).await;
        debug!(content_id = %id, "Removed cached item");
        true
    }

    /// Delete every cached item and start over with an empty manifest.
    pub async fn clear_cache(&self) -> Result<(), CacheError> {
        let mut manifest = self.manifest.lock().await;
        match tokio::fs::remove_dir_all(&self.cache_dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        tokio::fs::create_dir_all(&self.cache_dir).await?;

        *manifest = CacheManifest::default();
        manifest.save(&self.manifest_path).await?;
        info!("Content cache cleared");
        Ok(())
    }

    pub async fn get_cache_stats(&self) -> CacheStats {
        let manifest = self.manifest.lock().await;
        CacheStats {
            item_count: manifest.entries.len(),
            total_size_bytes: manifest.total_size_bytes(),
            max_size_bytes: self.config.max_size_bytes,
        }
    }

    fn begin_fetch(&self, id: &str) -> Option<InFlightGuard> {
        let mut set = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if !set.insert(id.to_string()) {
            return None;
        }
        Some(InFlightGuard {
            set: Arc::clone(&self.in_flight),
            id: id.to_string(),
        })
    }

    /// Fetch into `part`, move it to `path` and return the size on disk.
    async fn fetch_into(&self, url: &str, part: &Path, path: &Path) -> Result<u64, CacheError> {
        self.fetcher.fetch_to_file(url, part).await?;
        tokio::fs::rename(part, path).await?;
        Ok(tokio::fs::metadata(path).await?.len())
    }

    async fn persist(&self, manifest: &CacheManifest) {
        if let Err(e) = manifest.save(&self.manifest_path).await {
            error!(path = %self.manifest_path.display(), error = %e, "Failed to write cache manifest");
        }
    }

    /// Delete partial downloads and files orphaned by a lost or stale manifest.
    async fn remove_unreferenced_files(&self, manifest: &CacheManifest) {
        let referenced: HashSet<&str> = manifest
            .entries
            .values()
            .map(|e| e.file_name.as_str())
            .collect();
        let manifest_tmp = self.manifest_path.with_extension("json.tmp");

        let Ok(mut dir) = tokio::fs::read_dir(&self.cache_dir).await else {
            return;
        };
        let mut removed = 0usize;
        while let Ok(Some(entry)) = dir.next_entry().await {
            let path = entry.path();
            if path == self.manifest_path || path == manifest_tmp {
                continue;
            }
            if !entry.file_type().await.map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }
            let keep = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| referenced.contains(n));
            if !keep {
                debug!(path = %path.display(), "Removing unreferenced cache file");
                remove_if_present(&path).await;
                removed += 1;
            }
        }
        if removed > 0 {
            info!(removed, "Removed files missing from the cache manifest");
        }
    }
}

async fn remove_if_present(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to delete cached file"),
    }
}

/// Content ids come from the backend; keep only characters that are safe in
/// a file name on every platform.
fn sanitize_id(id: &str) -> String {
    let cleaned: String = id
        .chars()
        .take(64)
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "item".to_string()
    } else {
        cleaned
    }
}

/// Extension from the URL path, else from the MIME type, else `bin`.
fn file_extension(url: &str, mime_type: &str) -> String {
    let from_url = reqwest::Url::parse(url).ok().and_then(|url| {
        let last = url.path_segments()?.last()?.to_string();
        let (_, ext) = last.rsplit_once('.')?;
        if ext.is_empty() || ext.len() > 8 || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
            return None;
        }
        Some(ext.to_ascii_lowercase())
    });

    if let Some(ext) = from_url {
        return ext;
    }

    let ext = match mime_type {
        "image/jpeg" => "jpg",
        "image/png" => "png",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "image/svg+xml" => "svg",
        "video/mp4" => "mp4",
        "video/webm" => "webm",
        "video/ogg" => "ogv",
        _ => "bin",
    };
    ext.to_string()
}
