//! On-disk mirror of a target's request queue.
//!
//! The in-memory queue is authoritative for the running process. The file is a
//! crash-recovery aid: it is rewritten atomically after every queue mutation and
//! read once when the target is loaded.
//!
//! # File Format
//!
//! `<state_dir>/queues/<target>.json`:
//!
//! ```text
//! {
//!   "schema_version": 1,
//!   "target": "public",
//!   "saved_at": "2024-01-15T12:00:00Z",
//!   "entries": [
//!     {"project": "app", "number": 41},
//!     {"project": "app/core", "number": 7}
//!   ]
//! }
//! ```
//!
//! Entry order is queue order.

use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::fsync::write_atomic;
use crate::types::{BuildKey, TargetName};

/// Current schema version. Increment when making breaking changes.
pub const SCHEMA_VERSION: u32 = 1;

/// Errors that can occur while reading or writing a queue file.
#[derive(Debug, Error)]
pub enum QueueFileError {
    /// IO error during file operations.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Schema version mismatch.
    #[error("schema version mismatch: expected {expected}, got {got}")]
    SchemaMismatch { expected: u32, got: u32 },
}

/// Result type for queue file operations.
pub type Result<T> = std::result::Result<T, QueueFileError>;

/// The persisted form of a request queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedQueue {
    pub schema_version: u32,
    pub target: TargetName,
    pub saved_at: DateTime<Utc>,
    pub entries: Vec<BuildKey>,
}

impl PersistedQueue {
    pub fn new(target: TargetName, entries: Vec<BuildKey>) -> Self {
        PersistedQueue {
            schema_version: SCHEMA_VERSION,
            target,
            saved_at: Utc::now(),
            entries,
        }
    }
}

/// Returns the queue file path for a target.
pub fn queue_path(state_dir: &Path, target: &TargetName) -> PathBuf {
    state_dir
        .join("queues")
        .join(format!("{}.json", target.as_str()))
}

/// Writes the queue atomically.
pub fn save_queue(path: &Path, queue: &PersistedQueue) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(queue)?;
    write_atomic(path, &bytes)?;
    Ok(())
}

/// Loads a queue file.
///
/// Returns `Ok(None)` if the file does not exist (nothing to restore).
pub fn load_queue(path: &Path) -> Result<Option<PersistedQueue>> {
    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let queue: PersistedQueue = serde_json::from_slice(&bytes)?;
    if queue.schema_version != SCHEMA_VERSION {
        return Err(QueueFileError::SchemaMismatch {
            expected: SCHEMA_VERSION,
            got: queue.schema_version,
        });
    }
    Ok(Some(queue))
}
