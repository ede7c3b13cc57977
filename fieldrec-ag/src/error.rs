//! Error types for fieldrec-ag

use crate::services::{BatchError, GenerateError, PathRejected, ScanError};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Identifier escapes the audio root (403)
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Conflict (409), e.g. batch already running for the folder
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    /// Filesystem failure while serving a request (500)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<PathRejected> for ApiError {
    fn from(err: PathRejected) -> Self {
        match err {
            PathRejected::ParentTraversal | PathRejected::Absolute | PathRejected::ForbiddenCharacter => {
                ApiError::Forbidden(err.to_string())
            }
            PathRejected::Empty | PathRejected::NotAudioUri | PathRejected::InvalidEncoding => {
                ApiError::BadRequest(err.to_string())
            }
        }
    }
}

impl From<GenerateError> for ApiError {
    fn from(err: GenerateError) -> Self {
        match err {
            GenerateError::Rejected(rejected) => rejected.into(),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<ScanError> for ApiError {
    fn from(err: ScanError) -> Self {
        match err {
            ScanError::PathNotFound(path) => ApiError::NotFound(format!("folder {}", path.display())),
            ScanError::Io(e) => ApiError::Io(e),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<BatchError> for ApiError {
    fn from(err: BatchError) -> Self {
        match err {
            BatchError::Rejected(rejected) => rejected.into(),
            BatchError::FolderNotFound(folder) => ApiError::NotFound(format!("folder {}", folder)),
            BatchError::AlreadyRunning(_) => ApiError::Conflict(err.to_string()),
            BatchError::Scan(scan) => scan.into(),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, "FORBIDDEN", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg),
            ApiError::Io(ref err) => (StatusCode::INTERNAL_SERVER_ERROR, "IO_ERROR", err.to_string()),
        };

        if status.is_server_error() {
            tracing::error!(code = error_code, "{}", message);
        }

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn scan_failures_map_to_status_codes() {
        let missing: ApiError = ScanError::PathNotFound(PathBuf::from("/audio")).into();
        assert_eq!(missing.into_response().status(), StatusCode::NOT_FOUND);

        let io: ApiError = ScanError::Io(std::io::Error::from(std::io::ErrorKind::PermissionDenied)).into();
        assert!(matches!(io, ApiError::Io(_)));
        assert_eq!(io.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);

        let batch: ApiError = BatchError::Scan(ScanError::PathNotFound(PathBuf::from("/audio/x"))).into();
        assert_eq!(batch.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn path_rejections_split_forbidden_and_bad_request() {
        let traversal: ApiError = PathRejected::ParentTraversal.into();
        assert_eq!(traversal.into_response().status(), StatusCode::FORBIDDEN);
        let empty: ApiError = PathRejected::Empty.into();
        assert_eq!(empty.into_response().status(), StatusCode::BAD_REQUEST);
    }
}
