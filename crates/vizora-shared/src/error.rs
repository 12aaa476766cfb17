use thiserror::Error;

#[derive(Error, Debug)]
pub enum SharedError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unknown action type: {0}")]
    UnknownActionType(String),

    #[error("Invalid pairing code: {0}")]
    InvalidCode(String),
}
