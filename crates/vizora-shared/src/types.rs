use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::PAIRING_CODE_ALPHABET;
use crate::error::SharedError;

/// Identity a device presents when it claims a pairing code.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceInfo {
    /// Stable hardware or install identifier of the device.
    pub device_id: String,
    /// Human-readable display name ("Lobby Screen").
    pub name: String,
    /// Free-form metadata (model, OS version, resolution...).
    #[serde(default)]
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PairingStatus {
    Pending,
    Paired,
    Expired,
}

impl PairingStatus {
    /// `Paired` and `Expired` are final; nothing moves a session out of them.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for PairingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Paired => "paired",
            Self::Expired => "expired",
        };
        f.write_str(s)
    }
}

/// Sanitized pairing session, safe to hand to any transport listener.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PairingSessionView {
    pub id: Uuid,
    pub code: String,
    pub status: PairingStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Present only once the session is paired.
    pub device_info: Option<DeviceInfo>,
}

/// What a device keeps after a successful pairing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceCredentials {
    pub display_id: Uuid,
    pub device_token: String,
    pub paired_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

impl ConnectionState {
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }
}

/// Kinds of device-originated events the offline queue carries.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "kebab-case")]
pub enum ActionType {
    ContentUpdate,
    ScheduleUpdate,
    StatusReport,
    HealthUpdate,
    SettingsUpdate,
}

impl ActionType {
    pub const ALL: [ActionType; 5] = [
        Self::ContentUpdate,
        Self::ScheduleUpdate,
        Self::StatusReport,
        Self::HealthUpdate,
        Self::SettingsUpdate,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ContentUpdate => "content-update",
            Self::ScheduleUpdate => "schedule-update",
            Self::StatusReport => "status-report",
            Self::HealthUpdate => "health-update",
            Self::SettingsUpdate => "settings-update",
        }
    }

    /// Name of the outbound event this action is delivered as.
    pub fn event_name(self) -> &'static str {
        match self {
            Self::ContentUpdate => "content:update",
            Self::ScheduleUpdate => "schedule:update",
            Self::StatusReport => "status:report",
            Self::HealthUpdate => "health:update",
            Self::SettingsUpdate => "settings:update",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionType {
    type Err = SharedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| SharedError::UnknownActionType(s.to_string()))
    }
}

/// Canonicalize a user-typed pairing code: trims whitespace, upper-cases,
/// and rejects characters outside the code alphabet.
pub fn normalize_code(raw: &str) -> Result<String, SharedError> {
    let code = raw.trim().to_ascii_uppercase();
    if code.is_empty() || !code.bytes().all(|b| PAIRING_CODE_ALPHABET.contains(&b)) {
        return Err(SharedError::InvalidCode(raw.to_string()));
    }
    Ok(code)
}
