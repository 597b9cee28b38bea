use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

/// Error taxonomy shared by the permission, recurrence and invitation
/// services. Authorization failures are deliberately distinct from missing
/// records so clients can render an access-denied state instead of a 404.
#[derive(Error, Debug, Clone)]
pub enum CalendarError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Duplicate: {0}")]
    Duplicate(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for CalendarError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            CalendarError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            CalendarError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg.clone()),
            CalendarError::PermissionDenied(msg) => (StatusCode::FORBIDDEN, msg.clone()),
            CalendarError::InvalidState(msg) => (StatusCode::CONFLICT, msg.clone()),
            CalendarError::Duplicate(msg) => (StatusCode::CONFLICT, msg.clone()),
            CalendarError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            CalendarError::Database(_) | CalendarError::Internal(_) => {
                // Storage details stay in the logs, not in responses.
                log::error!("internal error: {}", self);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}
