//! Remote project synchronization.
//!
//! Before a build is sent, the remote must hold an up-to-date definition of its
//! project. Synchronization is idempotent: it probes, then creates or updates,
//! then walks sub-items parents first. Any failure aborts the whole sync.

use thiserror::Error;

use crate::builds::StoreError;
use crate::transfer::TransferError;
use crate::types::{FailedExchange, ProjectName};

pub mod config;
mod remote;

pub use config::ConfigRewrite;
pub use remote::RemoteSync;

/// Errors from remote synchronization.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Transfer(#[from] TransferError),

    /// A child project's parent does not exist remotely yet.
    #[error("parent project {parent} of {project} does not exist on the remote; publish the parent first")]
    ParentMissing {
        project: ProjectName,
        parent: ProjectName,
    },

    #[error("failed to read local project: {0}")]
    Store(#[from] StoreError),

    #[error("failed to encode configuration of {project}: {source}")]
    Encode {
        project: ProjectName,
        #[source]
        source: serde_json::Error,
    },
}

impl SyncError {
    pub fn exchange(&self) -> Option<&FailedExchange> {
        match self {
            SyncError::Transfer(e) => e.exchange(),
            _ => None,
        }
    }
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
