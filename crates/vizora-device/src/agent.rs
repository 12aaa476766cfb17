//! Boot sequence and lifetime of the device agent.

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use vizora_shared::clock::{Clock, SystemClock};
use vizora_shared::types::{ConnectionState, DeviceCredentials};
use vizora_store::credentials::{clear_credentials, load_credentials, save_credentials};
use vizora_store::{Database, KeyValueStore, SharedDatabase};

use crate::cache::{ContentCacheManager, HttpFetcher};
use crate::config::DeviceConfig;
use crate::connectivity::ConnectivityMonitor;
use crate::error::DeviceError;
use crate::pairing::PairingClient;
use crate::queue::{HttpActionSender, OfflineActionQueue};

/// A booted device: paired, with its cache and queue running.
pub struct Agent {
    pub credentials: DeviceCredentials,
    pub cache: Arc<ContentCacheManager>,
    pub queue: Arc<OfflineActionQueue>,
    pub connectivity: Arc<ConnectivityMonitor>,
    store: Arc<dyn KeyValueStore>,
    tasks: Vec<JoinHandle<()>>,
}

impl Agent {
    pub async fn boot(config: DeviceConfig) -> Result<Self, DeviceError> {
        config.validate()?;

        // -------------------------------------------------------------------
        // Storage
        // -------------------------------------------------------------------
        let data_dir = match &config.data_dir {
            Some(dir) => dir.clone(),
            None => vizora_store::database::default_data_dir()?,
        };
        let store: Arc<dyn KeyValueStore> = Arc::new(SharedDatabase::new(Database::open_at(
            &data_dir.join("vizora.db"),
        )?));
        info!(data_dir = %data_dir.display(), "Opened device store");

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("vizora-device/", env!("CARGO_PKG_VERSION")))
            .build()?;

        // -------------------------------------------------------------------
        // Credentials
        // -------------------------------------------------------------------
        let credentials = match load_credentials(store.as_ref())? {
            Some(credentials) => {
                info!(display_id = %credentials.display_id, "Using stored credentials");
                credentials
            }
            None => {
                info!(device_id = %config.device_id, "Device not paired yet");
                let pairing = PairingClient::new(
                    client.clone(),
                    &config.api_url,
                    config.pairing_poll_interval,
                    config.device_info(),
                );
                let credentials = pairing.pair().await;
                save_credentials(store.as_ref(), &credentials)?;
                credentials
            }
        };

        Self::start(config, data_dir, store, client, credentials).await
    }

    async fn start(
        config: DeviceConfig,
        data_dir: PathBuf,
        store: Arc<dyn KeyValueStore>,
        client: reqwest::Client,
        credentials: DeviceCredentials,
    ) -> Result<Self, DeviceError> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        // -------------------------------------------------------------------
        // Content cache
        // -------------------------------------------------------------------
        let cache = Arc::new(ContentCacheManager::new(
            &data_dir,
            config.cache(),
            Arc::new(HttpFetcher::new(client.clone())),
            clock.clone(),
        ));
        cache.init().await?;

        // -------------------------------------------------------------------
        // Connectivity and offline queue
        // -------------------------------------------------------------------
        let connectivity = Arc::new(ConnectivityMonitor::new(ConnectionState::Disconnected));
        let sender = Arc::new(HttpActionSender::new(
            client.clone(),
            &config.api_url,
            credentials.device_token.clone(),
        ));
        let queue = Arc::new(OfflineActionQueue::restore(
            config.queue(),
            store.clone(),
            sender,
            connectivity.subscribe(),
            clock,
        ));

        let tasks = vec![
            connectivity.spawn_probe(
                client,
                format!("{}/health", config.api_url),
                config.health_interval,
            ),
            queue.spawn_drain_loop(config.retry_tick),
        ];

        let status = queue.get_queue_status().await;
        let stats = cache.get_cache_stats().await;
        info!(
            display_id = %credentials.display_id,
            queued = status.total,
            cached_items = stats.item_count,
            cached_bytes = stats.total_size_bytes,
            "Device agent running"
        );

        queue
            .enqueue_status_report(json!({
                "status": "online",
                "device_id": config.device_id,
                "version": env!("CARGO_PKG_VERSION"),
            }))
            .await;

        Ok(Self {
            credentials,
            cache,
            queue,
            connectivity,
            store,
            tasks,
        })
    }

    /// Forget the pairing: credentials, cached content and undelivered events.
    pub async fn unpair(&self) -> Result<(), DeviceError> {
        clear_credentials(self.store.as_ref())?;
        let dropped = self.queue.clear_queue().await;
        if let Err(e) = self.cache.clear_cache().await {
            warn!(error = %e, "Failed to clear content cache while unpairing");
        }
        info!(dropped_actions = dropped, "Device unpaired");
        Ok(())
    }

    pub async fn shutdown(self) {
        for task in self.tasks {
            task.abort();
            let _ = task.await;
        }
        info!("Device agent stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::time::Duration;
    use uuid::Uuid;

    fn offline_config(dir: &std::path::Path) -> DeviceConfig {
        DeviceConfig {
            api_url: "http://127.0.0.1:9".into(),
            data_dir: Some(dir.to_path_buf()),
            request_timeout: Duration::from_millis(200),
            health_interval: Duration::from_secs(3600),
            retry_tick: Duration::from_secs(3600),
            ..DeviceConfig::default()
        }
    }

    #[tokio::test]
    async fn test_boots_offline_with_stored_credentials_and_unpairs() {
        let dir = tempfile::tempdir().unwrap();
        let credentials = DeviceCredentials {
            display_id: Uuid::new_v4(),
            device_token: "cd".repeat(32),
            paired_at: Utc::now(),
        };
        {
            let store = SharedDatabase::new(Database::open_at(&dir.path().join("vizora.db")).unwrap());
            save_credentials(&store, &credentials).unwrap();
        }

        let agent = Agent::boot(offline_config(dir.path())).await.unwrap();
        assert_eq!(agent.credentials, credentials);
        assert!(agent.cache.cache_dir().exists());
        // The boot status report waits for a connection.
        assert_eq!(agent.queue.get_queue_status().await.total, 1);

        agent.unpair().await.unwrap();
        assert_eq!(agent.queue.get_queue_status().await.total, 0);
        assert_eq!(load_credentials(agent.store.as_ref()).unwrap(), None);
        agent.shutdown().await;
    }

    #[tokio::test]
    async fn test_invalid_config_fails_boot() {
        let dir = tempfile::tempdir().unwrap();
        let config = DeviceConfig {
            cache_max_mb: 0,
            ..offline_config(dir.path())
        };
        assert!(matches!(
            Agent::boot(config).await,
            Err(DeviceError::Config(_))
        ));
    }
}
