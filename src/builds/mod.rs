//! Access to the local build server's projects and builds.
//!
//! The publisher treats the build server as an external collaborator. Everything
//! it needs goes through the [`BuildStore`] trait, so the queue and the worker
//! can run against the on-disk layout ([`FsBuildStore`]) or any other source.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::types::{BuildKey, BuildRef, ProjectName, ProjectRef};

pub mod config;
pub mod fs;
pub mod metadata;

pub use config::{ProjectConfig, PublisherEntry, PublisherSettings};
pub use fs::FsBuildStore;
pub use metadata::{BuildMetadata, ChildBuild, METADATA_FILE, read_metadata, write_metadata};

/// Errors from the build store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The project does not exist locally.
    #[error("project not found: {0}")]
    ProjectNotFound(ProjectName),

    /// A record could not be read or parsed.
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Result type for build store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Read access to the local build server.
pub trait BuildStore: Send + Sync {
    /// Resolves a build key to a live build.
    ///
    /// Returns `Ok(None)` if the build (or its project) no longer exists.
    fn resolve(&self, key: &BuildKey) -> Result<Option<BuildRef>>;

    /// Looks up a project by full name.
    fn project(&self, name: &ProjectName) -> Result<Option<ProjectRef>>;

    /// Reads a project's configuration record.
    fn project_config(&self, name: &ProjectName) -> Result<ProjectConfig>;
}
