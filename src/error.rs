use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Error taxonomy for broker operations.
///
/// None of these are fatal to the process. `Internal` means a persistence
/// write failed; the in-memory state has already been rolled back when the
/// caller sees it.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("{0}")]
    Validation(String),

    #[error("room not found")]
    RoomNotFound,

    #[error("username \"{0}\" is already taken in this room")]
    UsernameTaken(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = core::result::Result<T, BrokerError>;

impl IntoResponse for BrokerError {
    fn into_response(self) -> Response {
        let status = match self {
            BrokerError::Validation(_) => StatusCode::BAD_REQUEST,
            BrokerError::RoomNotFound => StatusCode::NOT_FOUND,
            BrokerError::UsernameTaken(_) => StatusCode::CONFLICT,
            BrokerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "error": {
                "message": self.to_string()
            }
        }));

        (status, body).into_response()
    }
}

impl From<anyhow::Error> for BrokerError {
    fn from(err: anyhow::Error) -> Self {
        BrokerError::Internal(err.to_string())
    }
}
