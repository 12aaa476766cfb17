use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use super::action::QueuedAction;

#[derive(Debug, Error)]
pub enum SendError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("backend rejected event with status {0}")]
    Rejected(reqwest::StatusCode),

    #[error("transport unavailable: {0}")]
    Unavailable(String),
}

/// Delivers one queued action to the backend.
#[async_trait]
pub trait ActionSender: Send + Sync {
    async fn send(&self, action: &QueuedAction) -> Result<(), SendError>;
}

/// Body of an outbound device event.
#[derive(Debug, Serialize)]
pub struct OutboundEvent<'a> {
    pub event: &'static str,
    pub payload: &'a serde_json::Value,
    pub enqueued_at: DateTime<Utc>,
    pub action_id: Uuid,
}

impl<'a> From<&'a QueuedAction> for OutboundEvent<'a> {
    fn from(action: &'a QueuedAction) -> Self {
        Self {
            event: action.action_type.event_name(),
            payload: &action.payload,
            enqueued_at: action.enqueued_at,
            action_id: action.id,
        }
    }
}

/// POSTs events to `<api_url>/devices/events` with the device bearer token.
#[derive(Debug, Clone)]
pub struct HttpActionSender {
    client: reqwest::Client,
    endpoint: String,
    device_token: String,
}

impl HttpActionSender {
    pub fn new(client: reqwest::Client, api_url: &str, device_token: String) -> Self {
        Self {
            client,
            endpoint: format!("{}/devices/events", api_url.trim_end_matches('/')),
            device_token,
        }
    }
}

#[async_trait]
impl ActionSender for HttpActionSender {
    async fn send(&self, action: &QueuedAction) -> Result<(), SendError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.device_token)
            .json(&OutboundEvent::from(action))
            .send()
            .await?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(SendError::Rejected(response.status()))
        }
    }
}
