use crate::services::FileError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;
use tracing::error;

/// HTTP-facing error: a status code plus a message rendered as
/// `{"error": ..., "status": ...}`.
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
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<FileError> for AppError {
    fn from(err: FileError) -> Self {
        let status = match &err {
            FileError::NotFound => StatusCode::NOT_FOUND,
            FileError::Expired => StatusCode::GONE,
            FileError::PasswordRequired => StatusCode::UNAUTHORIZED,
            FileError::PasswordInvalid => StatusCode::FORBIDDEN,
            FileError::InvalidSlug { .. } => StatusCode::BAD_REQUEST,
            FileError::AlreadyTaken(_) => StatusCode::CONFLICT,
            FileError::GenerationExhausted { .. }
            | FileError::Inconsistency { .. }
            | FileError::Hashing(_)
            | FileError::Storage(_)
            | FileError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        // Server-side details stay in the log.
        if status.is_server_error() {
            error!(error = %err, "request failed");
            return AppError::internal("internal server error");
        }
        AppError::new(status, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{repository::UniqueField, storage::StorageError};

    #[test]
    fn maps_file_errors_to_statuses() {
        let cases = [
            (FileError::NotFound, StatusCode::NOT_FOUND),
            (FileError::Expired, StatusCode::GONE),
            (FileError::PasswordRequired, StatusCode::UNAUTHORIZED),
            (FileError::PasswordInvalid, StatusCode::FORBIDDEN),
            (
                FileError::InvalidSlug {
                    slug: "A B".into(),
                    reason: "nope",
                },
                StatusCode::BAD_REQUEST,
            ),
            (
                FileError::AlreadyTaken(UniqueField::Slug),
                StatusCode::CONFLICT,
            ),
            (
                FileError::GenerationExhausted {
                    what: "slug",
                    attempts: 100,
                },
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(AppError::from(err).status, status);
        }
    }

    #[test]
    fn hides_internal_details() {
        let err = AppError::from(FileError::Storage(StorageError::ObjectStore(
            "secret endpoint detail".into(),
        )));
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!err.message.contains("secret"));

        let err = AppError::from(FileError::AlreadyTaken(UniqueField::Slug));
        assert_eq!(err.message, "slug is already taken");
    }
}
