//! Device side of the pairing flow.
//!
//! An unpaired device asks the backend for a code, shows it, registers its
//! identity under that code and polls until the backend hands out
//! credentials. A code that expires first is replaced with a fresh one.

use std::time::Duration;

use chrono::Utc;
use reqwest::StatusCode;
use tracing::{debug, info, warn};

use vizora_shared::types::{DeviceCredentials, DeviceInfo, PairingSessionView};

use crate::error::DeviceError;

/// Answer to one credential poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialsPoll {
    Ready(DeviceCredentials),
    Pending,
    /// The session expired or no longer exists.
    Gone,
}

/// Answer to registering the device under a code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// The session now carries this device (or already did).
    Accepted,
    /// The code expired or no longer exists.
    Gone,
}

#[derive(Debug, Clone)]
pub struct PairingClient {
    client: reqwest::Client,
    api_url: String,
    poll_interval: Duration,
    device: DeviceInfo,
}

impl PairingClient {
    pub fn new(
        client: reqwest::Client,
        api_url: &str,
        poll_interval: Duration,
        device: DeviceInfo,
    ) -> Self {
        Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            poll_interval,
            device,
        }
    }

    pub fn device(&self) -> &DeviceInfo {
        &self.device
    }

    pub async fn request_session(&self) -> Result<PairingSessionView, DeviceError> {
        let response = self
            .client
            .post(format!("{}/pairing/sessions", self.api_url))
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }

    /// Attach this device's identity to the session behind `code`.
    pub async fn register(&self, code: &str) -> Result<Registration, DeviceError> {
        let response = self
            .client
            .post(format!("{}/pairing/sessions/{code}/pair", self.api_url))
            .json(&self.device)
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(Registration::Accepted),
            StatusCode::NOT_FOUND | StatusCode::GONE => Ok(Registration::Gone),
            status => Err(DeviceError::Pairing(format!(
                "unexpected status {status} while registering under {code}"
            ))),
        }
    }

    pub async fn poll_credentials(&self, code: &str) -> Result<CredentialsPoll, DeviceError> {
        let response = self
            .client
            .post(self.credentials_url(code))
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(CredentialsPoll::Ready(response.json().await?)),
            StatusCode::ACCEPTED => Ok(CredentialsPoll::Pending),
            StatusCode::NOT_FOUND | StatusCode::GONE => Ok(CredentialsPoll::Gone),
            status => Err(DeviceError::Pairing(format!(
                "unexpected status {status} while polling credentials"
            ))),
        }
    }

    /// Run the pairing flow until the device holds credentials. Network
    /// errors are logged and retried at the poll interval.
    pub async fn pair(&self) -> DeviceCredentials {
        loop {
            let session = match self.request_session().await {
                Ok(session) => session,
                Err(e) => {
                    warn!(error = %e, "Could not open a pairing session, retrying");
                    tokio::time::sleep(self.poll_interval).await;
                    continue;
                }
            };

            info!(
                code = %session.code,
                expires_at = %session.expires_at,
                "Enter this pairing code in the Vizora dashboard"
            );

            match self.register(&session.code).await {
                Ok(Registration::Accepted) => {
                    debug!(code = %session.code, device_id = %self.device.device_id, "Registered under code");
                }
                Ok(Registration::Gone) => {
                    info!(code = %session.code, "Pairing code gone before registration, requesting a new one");
                    continue;
                }
                Err(e) => {
                    warn!(code = %session.code, error = %e, "Registration failed, retrying with a new code");
                    tokio::time::sleep(self.poll_interval).await;
                    continue;
                }
            }

            if let Some(credentials) = self.wait_for_claim(&session).await {
                info!(display_id = %credentials.display_id, "Device paired");
                return credentials;
            }

            info!(code = %session.code, "Pairing code expired, requesting a new one");
        }
    }

    async fn wait_for_claim(&self, session: &PairingSessionView) -> Option<DeviceCredentials> {
        loop {
            tokio::time::sleep(self.poll_interval).await;

            match self.poll_credentials(&session.code).await {
                Ok(CredentialsPoll::Ready(credentials)) => return Some(credentials),
                Ok(CredentialsPoll::Gone) => return None,
                Ok(CredentialsPoll::Pending) => {
                    debug!(code = %session.code, "Waiting for pairing");
                }
                Err(e) => {
                    warn!(code = %session.code, error = %e, "Credential poll failed");
                    if Utc::now() > session.expires_at {
                        return None;
                    }
                }
            }
        }
    }

    fn credentials_url(&self, code: &str) -> String {
        format!("{}/pairing/sessions/{code}/credentials", self.api_url)
    }
}
