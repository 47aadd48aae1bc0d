//! Error type shared by the operator API handlers.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::builds::StoreError;
use crate::status::StatusError;
use crate::target::RegistryError;
use crate::types::{BuildKey, TargetName};

/// Errors returned by operator API handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("unknown target: {0}")]
    UnknownTarget(String),

    #[error("build not found: {0}")]
    BuildNotFound(BuildKey),

    #[error("{build} has no publishing status for {target}")]
    NoStatus { build: BuildKey, target: TargetName },

    #[error("build store error: {0}")]
    Store(#[from] StoreError),

    #[error("status error: {0}")]
    Status(#[from] StatusError),

    #[error("trigger error: {0}")]
    Registry(#[from] RegistryError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::UnknownTarget(_) | ApiError::BuildNotFound(_) | ApiError::NoStatus { .. } => {
                StatusCode::NOT_FOUND
            }
            ApiError::Store(_) | ApiError::Status(_) | ApiError::Registry(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        (status, self.to_string()).into_response()
    }
}
