use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Pairing session not found: {0}")]
    SessionNotFound(String),

    #[error("Pairing session expired: {0}")]
    SessionExpired(String),

    #[error("Could not allocate a unique pairing code")]
    CodeSpaceExhausted,

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServerError::SessionNotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            ServerError::SessionExpired(_) => (StatusCode::GONE, self.to_string()),
            ServerError::CodeSpaceExhausted => {
                (StatusCode::SERVICE_UNAVAILABLE, self.to_string())
            }
            ServerError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ServerError::Config(_) | ServerError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, axum::Json(body)).into_response()
    }
}

impl From<vizora_shared::SharedError> for ServerError {
    fn from(err: vizora_shared::SharedError) -> Self {
        ServerError::BadRequest(err.to_string())
    }
}
