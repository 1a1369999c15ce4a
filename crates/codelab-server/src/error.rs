use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use codelab_session::SessionError;
use tracing::error;

/// HTTP-facing error. Everything the service layer can reject maps onto a
/// status code and a JSON `{"error": ...}` body; internal failures are
/// logged in full and surfaced with a generic message.
#[derive(Debug)]
pub enum ApiError {
    UnprocessableEntity(String),
    NotFound(String),
    Forbidden(String),
    Conflict(String),
    TooManyRequests(String),
    Internal(String),
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::UnsupportedLanguage(e) => ApiError::UnprocessableEntity(e.to_string()),
            SessionError::NotFound(msg) => ApiError::NotFound(msg),
            SessionError::Forbidden(msg) => ApiError::Forbidden(msg),
            SessionError::Conflict(msg) => ApiError::Conflict(msg),
            SessionError::TooManyRequests(msg) => ApiError::TooManyRequests(msg),
            SessionError::Store(msg) | SessionError::Queue(msg) => ApiError::Internal(msg),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::UnprocessableEntity(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::TooManyRequests(msg) => (StatusCode::TOO_MANY_REQUESTS, msg),
            ApiError::Internal(msg) => {
                error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, Json(body)).into_response()
    }
}
