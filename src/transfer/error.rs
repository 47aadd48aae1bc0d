//! Transfer client error types.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::types::FailedExchange;

/// Errors from HTTP exchanges with a remote target.
#[derive(Debug, Error)]
pub enum TransferError {
    /// The remote could not be reached or the connection broke.
    #[error("cannot reach {url}: {source}")]
    Connectivity {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The remote answered with a failure status.
    #[error("{} {} returned HTTP {}", .0.method, .0.url, .0.status)]
    ServerStatus(Box<FailedExchange>),

    /// The remote accepted the build but did not confirm which project it got.
    #[error("remote did not confirm receipt of {expected} (got {received:?})")]
    MissingReceipt {
        expected: String,
        received: Option<String>,
        exchange: Box<FailedExchange>,
    },

    /// A redirect chain did not terminate.
    #[error("too many redirects starting at {url}")]
    TooManyRedirects { url: String },

    /// The transfer was aborted by an operator.
    #[error("transfer aborted")]
    Aborted,

    /// A URL could not be built or a redirect location was unusable.
    #[error("invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    /// The request body could not be opened.
    #[error("failed to open request body {path}: {source}")]
    Body {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl TransferError {
    /// Returns the captured server exchange, if this failure carries one.
    pub fn exchange(&self) -> Option<&FailedExchange> {
        match self {
            TransferError::ServerStatus(exchange) => Some(exchange),
            TransferError::MissingReceipt { exchange, .. } => Some(exchange),
            _ => None,
        }
    }

    /// Returns true if this failure was caused by an operator abort.
    pub fn is_aborted(&self) -> bool {
        matches!(self, TransferError::Aborted)
    }

    pub(crate) fn invalid_url(url: impl Into<String>, reason: impl ToString) -> Self {
        TransferError::InvalidUrl {
            url: url.into(),
            reason: reason.to_string(),
        }
    }
}

/// Result type for transfer operations.
pub type Result<T> = std::result::Result<T, TransferError>;
