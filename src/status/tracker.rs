use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use thiserror::Error;
use tracing::debug;

use crate::builds::{METADATA_FILE, read_metadata, write_metadata};
use crate::types::{BuildRef, StatusRecord, TargetName};

/// Errors reading or writing status records.
#[derive(Debug, Error)]
pub enum StatusError {
    #[error("failed to update status in {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

pub type Result<T> = std::result::Result<T, StatusError>;

/// Reads and writes per-target status records on builds.
///
/// Records live in the `publishing` section of each build's metadata record,
/// keyed by target name. Every write is a read-modify-write of that file, so
/// all targets of a process share one tracker.
#[derive(Debug, Default)]
pub struct StatusTracker {
    lock: Mutex<()>,
}

impl StatusTracker {
    pub fn new() -> Self {
        StatusTracker::default()
    }

    /// Attaches `record` to `build`, replacing any previous record of the
    /// same target.
    pub fn record(&self, build: &BuildRef, record: StatusRecord) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let dir = &build.root_dir;

        let mut metadata = read_metadata(dir).map_err(|e| io_error(dir, e))?;
        debug!(
            build = %build.key,
            remote = %record.target,
            status = %record.state,
            "Recording publish status"
        );
        metadata.publishing.insert(record.target.clone(), record);
        write_metadata(dir, &metadata).map_err(|e| io_error(dir, e))
    }

    /// Returns the record `target` attached to `build`, if any.
    pub fn get(&self, build: &BuildRef, target: &TargetName) -> Result<Option<StatusRecord>> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let dir = &build.root_dir;

        let mut metadata = read_metadata(dir).map_err(|e| io_error(dir, e))?;
        Ok(metadata.publishing.remove(target))
    }
}

fn io_error(build_dir: &Path, source: io::Error) -> StatusError {
    StatusError::Io {
        path: build_dir.join(METADATA_FILE),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builds::BuildStore;
    use crate::test_utils::BuildTree;
    use crate::types::{BuildKey, BuildResult, ProjectKind, PublishState};

    fn target(name: &str) -> TargetName {
        TargetName::parse(name).unwrap()
    }

    #[test]
    fn records_are_independent_per_target() {
        let tree = BuildTree::new();
        tree.project("app", ProjectKind::Plain);
        tree.build("app", 1, Some(BuildResult::Success), &[]);
        let build = tree.store().resolve(&BuildKey::new("app", 1)).unwrap().unwrap();
        let tracker = StatusTracker::new();

        tracker
            .record(&build, StatusRecord::pending(target("public")))
            .unwrap();
        tracker
            .record(&build, StatusRecord::success(target("mirror")))
            .unwrap();
        tracker
            .record(&build, StatusRecord::in_progress(target("public")))
            .unwrap();

        let public = tracker.get(&build, &target("public")).unwrap().unwrap();
        let mirror = tracker.get(&build, &target("mirror")).unwrap().unwrap();
        assert_eq!(public.state, PublishState::InProgress);
        assert_eq!(mirror.state, PublishState::Success);
        assert!(tracker.get(&build, &target("other")).unwrap().is_none());
    }

    #[test]
    fn recording_on_deleted_build_fails() {
        let tree = BuildTree::new();
        tree.project("app", ProjectKind::Plain);
        tree.build("app", 1, Some(BuildResult::Success), &[]);
        let build = tree.store().resolve(&BuildKey::new("app", 1)).unwrap().unwrap();
        std::fs::remove_dir_all(&build.root_dir).unwrap();

        let err = StatusTracker::new()
            .record(&build, StatusRecord::pending(target("public")))
            .unwrap_err();
        assert!(matches!(err, StatusError::Io { .. }));
    }
}
