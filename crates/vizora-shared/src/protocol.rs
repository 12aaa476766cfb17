use serde::{Deserialize, Serialize};

use crate::error::SharedError;
use crate::types::{DeviceInfo, PairingSessionView};

/// Messages a frontend or device sends over the pairing event channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Ask for a fresh pairing code.
    CreateSession,

    /// Receive `PairingUpdate` for every status change of `code`.
    Subscribe { code: String },

    /// Stop receiving updates for `code`.
    Unsubscribe { code: String },

    /// One-off status read.
    CheckStatus { code: String },

    /// A device claiming the code with its own identity.
    RegisterWithCode {
        code: String,
        device_id: String,
        name: String,
        #[serde(default)]
        metadata: serde_json::Value,
    },

    /// An operator pairing a device on its behalf.
    PairDevice { code: String, device_info: DeviceInfo },
}

/// Messages the backend pushes over the pairing event channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    SessionCreated { session: PairingSessionView },

    /// Pushed to subscribers on every status transition.
    PairingUpdate { session: PairingSessionView },

    PairResult { outcome: PairOutcome },

    Status { session: Option<PairingSessionView> },

    Error { message: String },
}

/// Result of presenting a code for pairing. Unknown and expired codes are
/// ordinary outcomes: the caller is an unattended device that branches on
/// them rather than recovering from an error.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "outcome", content = "session", rename_all = "snake_case")]
pub enum PairOutcome {
    Paired(PairingSessionView),
    AlreadyPaired(PairingSessionView),
    Expired(PairingSessionView),
    NotFound,
}

impl PairOutcome {
    pub fn session(&self) -> Option<&PairingSessionView> {
        match self {
            Self::Paired(s) | Self::AlreadyPaired(s) | Self::Expired(s) => Some(s),
            Self::NotFound => None,
        }
    }
}

impl ClientMessage {
    pub fn from_json(text: &str) -> Result<Self, SharedError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> Result<String, SharedError> {
        Ok(serde_json::to_string(self)?)
    }
}

impl ServerMessage {
    pub fn from_json(text: &str) -> Result<Self, SharedError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> Result<String, SharedError> {
        Ok(serde_json::to_string(self)?)
    }
}
