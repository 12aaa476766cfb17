use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use vizora_shared::constants::MAX_RETRY_DELAY_SECS;
use vizora_shared::types::ActionType;

/// Where an action is in its delivery lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ActionState {
    /// Waiting for a connection or for its backoff to pass.
    #[default]
    Queued,
    /// Handed to the sender.
    Delivering,
    Delivered,
    /// Gave up after too many failed attempts, or cleared.
    Discarded,
}

/// A device-originated event waiting to reach the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedAction {
    pub id: Uuid,
    pub action_type: ActionType,
    pub payload: serde_json::Value,
    pub enqueued_at: DateTime<Utc>,
    pub attempt_count: u32,
    pub next_attempt_at: DateTime<Utc>,
    pub dedupe_key: String,
    /// Only `Queued` actions are ever written to storage.
    #[serde(skip)]
    pub state: ActionState,
}

impl QueuedAction {
    pub fn new(action_type: ActionType, payload: serde_json::Value, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            dedupe_key: dedupe_key(action_type, &payload),
            action_type,
            payload,
            enqueued_at: now,
            attempt_count: 0,
            next_attempt_at: now,
            state: ActionState::Queued,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_attempt_at <= now
    }

    /// Record a failed delivery. The action is discarded once it has failed
    /// `max_retries` times, otherwise it is rescheduled with backoff.
    pub fn record_failure(
        &mut self,
        now: DateTime<Utc>,
        retry_delay: Duration,
        max_retries: u32,
    ) -> ActionState {
        self.attempt_count = self.attempt_count.saturating_add(1);

        self.state = if self.attempt_count >= max_retries {
            ActionState::Discarded
        } else {
            let delay = backoff_delay(retry_delay, self.attempt_count);
            self.next_attempt_at = now
                + chrono::Duration::from_std(delay)
                    .unwrap_or_else(|_| chrono::Duration::seconds(MAX_RETRY_DELAY_SECS as i64));
            ActionState::Queued
        };
        self.state
    }
}

/// Digest identifying "the same action": type plus payload JSON. Object keys
/// serialize in sorted order, so field order in the payload does not matter.
pub fn dedupe_key(action_type: ActionType, payload: &serde_json::Value) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(action_type.as_str().as_bytes());
    hasher.update(b"\n");
    hasher.update(payload.to_string().as_bytes());
    hasher.finalize().to_hex().to_string()
}

/// `retry_delay * 2^(attempt - 1)`, capped.
pub fn backoff_delay(retry_delay: Duration, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    retry_delay
        .saturating_mul(factor)
        .min(Duration::from_secs(MAX_RETRY_DELAY_SECS))
}
