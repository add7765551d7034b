//! HTTP error mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use metriq_common::{BatchError, CodecError, ValidationError};
use metriq_storage::RepositoryError;
use thiserror::Error;
use tracing::{debug, warn};

/// Everything a handler can fail with, each mapped to one status code.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to read request body: {0}")]
    Body(String),

    /// A write the repository refused.
    #[error("{0}")]
    Rejected(#[source] RepositoryError),

    #[error("metric not found")]
    NotFound,

    /// A read or health check that failed for reasons other than absence.
    #[error("storage unavailable: {0}")]
    Unavailable(#[source] RepositoryError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Invalid(err) if err.is_not_found() => StatusCode::NOT_FOUND,
            Self::Invalid(_) | Self::Codec(_) | Self::Json(_) | Self::Body(_) | Self::Rejected(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Unavailable(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Map a failed read: absence is 404, anything else 500.
    pub fn from_read(err: RepositoryError) -> Self {
        if err.is_not_found() {
            Self::NotFound
        } else {
            Self::Unavailable(err)
        }
    }

    /// Map a failed write. An empty name stays 404.
    pub fn from_write(err: RepositoryError) -> Self {
        match err {
            RepositoryError::Validation(invalid) => Self::Invalid(invalid),
            other => Self::Rejected(other),
        }
    }
}

impl From<BatchError> for ApiError {
    fn from(err: BatchError) -> Self {
        match err {
            BatchError::Json(e) => Self::Json(e),
            BatchError::Invalid(e) => Self::Invalid(e),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!(%status, error = %self, "Request failed");
        } else {
            debug!(%status, error = %self, "Request rejected");
        }
        (status, self.to_string()).into_response()
    }
}
