//! Build archive packaging.
//!
//! A build is sent to a remote as one tar stream:
//!
//! ```text
//! <build-dir>/log
//! <build-dir>/archive/target/app.jar
//! ...
//! <build-dir>/build.json          # always the last entry
//! ```
//!
//! Entry names use forward slashes on every host. The metadata record is
//! rewritten before it is added (see [`transmitted_metadata`]) and is never
//! taken from the directory walk.
//!
//! Packaging writes to an anonymous temporary file that the transfer client then
//! streams. An abort stops packaging between entries or mid-file; the partial
//! file is discarded and never reaches the network.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

mod packager;

pub use packager::{Archive, package, package_blocking, transmitted_metadata};

/// Errors from archive packaging.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// A build file or the metadata record could not be read.
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The temporary archive could not be written.
    #[error("failed to write archive: {0}")]
    Write(#[source] io::Error),

    /// Walking the build directory failed.
    #[error("failed to walk build directory: {0}")]
    Walk(#[from] walkdir::Error),

    /// Packaging was aborted by an operator.
    #[error("archive packaging aborted")]
    Aborted,

    /// The blocking packaging task did not complete.
    #[error("archive task failed: {0}")]
    Task(String),
}

/// Result type for archive operations.
pub type Result<T> = std::result::Result<T, ArchiveError>;
