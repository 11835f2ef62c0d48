use crate::services::registry::RegistryError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    /// Shortcut for 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "status": "error",
            "message": self.message,
            "code": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<RegistryError> for AppError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::BadInput(msg) => AppError::bad_request(msg),
            RegistryError::Oversize { limit, .. } => AppError::new(
                StatusCode::PAYLOAD_TOO_LARGE,
                format!("file too large, maximum is {} bytes", limit),
            ),
            RegistryError::NotFound(_) => AppError::not_found("file not found"),
            other => {
                tracing::error!("registry failure: {}", other);
                AppError::internal("internal storage error")
            }
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn registry_errors_map_to_statuses() {
        let cases = [
            (RegistryError::BadInput("x".into()), StatusCode::BAD_REQUEST),
            (
                RegistryError::Oversize { size: 10, limit: 5 },
                StatusCode::PAYLOAD_TOO_LARGE,
            ),
            (RegistryError::NotFound("abc".into()), StatusCode::NOT_FOUND),
            (
                RegistryError::Io(io::Error::other("boom")),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                RegistryError::InvalidConfig("empty alphabet".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                RegistryError::IdSpaceExhausted(64),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(AppError::from(err).status, status);
        }
    }
}
