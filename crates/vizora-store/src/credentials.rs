//! Persistence of the credentials a device receives from pairing.
//!
//! A device that already holds credentials skips the pairing flow on boot.
//! Unpairing clears them together with the content cache.

use vizora_shared::constants::CREDENTIALS_STORAGE_KEY;
use vizora_shared::types::DeviceCredentials;

use crate::error::Result;
use crate::kv::{load_json, save_json, KeyValueStore};

pub fn load_credentials(store: &dyn KeyValueStore) -> Result<Option<DeviceCredentials>> {
    load_json(store, CREDENTIALS_STORAGE_KEY)
}

pub fn save_credentials(store: &dyn KeyValueStore, credentials: &DeviceCredentials) -> Result<()> {
    save_json(store, CREDENTIALS_STORAGE_KEY, credentials)?;
    tracing::info!(display_id = %credentials.display_id, "stored device credentials");
    Ok(())
}

/// Forget the stored credentials. Returns `true` if any were present.
pub fn clear_credentials(store: &dyn KeyValueStore) -> Result<bool> {
    let removed = store.delete(CREDENTIALS_STORAGE_KEY)?;
    if removed {
        tracing::info!("cleared device credentials");
    }
    Ok(removed)
}
