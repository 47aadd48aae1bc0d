//! Filesystem-backed build store.
//!
//! # Layout
//!
//! ```text
//! <root>/jobs/<project>/
//!   config.json                  # project configuration
//!   builds/<number>/
//!     build.json                 # build metadata record
//!     log, archive/...           # build files
//!   items/<child>/               # child project, same shape
//!     config.json
//!     builds/<number>/...
//! ```
//!
//! A project's full name is the `/`-joined path of its segments, so
//! `jobs/app/items/core` is the project `app/core`.

use std::io;
use std::path::{Path, PathBuf};

use tracing::warn;

use super::config::{CONFIG_FILE, ProjectConfig, read_config};
use super::metadata::{BuildMetadata, read_metadata};
use super::{BuildStore, Result, StoreError};
use crate::types::{BuildKey, BuildRef, BuildResult, ProjectName, ProjectRef};

/// Build store reading the local build server's job tree.
#[derive(Debug, Clone)]
pub struct FsBuildStore {
    root: PathBuf,
}

impl FsBuildStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FsBuildStore { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the directory of a project.
    pub fn project_dir(&self, name: &ProjectName) -> PathBuf {
        let mut dir = self.root.join("jobs");
        for (i, segment) in name.segments().enumerate() {
            if i > 0 {
                dir.push("items");
            }
            dir.push(segment);
        }
        dir
    }

    /// Returns the directory of a build.
    pub fn build_dir(&self, key: &BuildKey) -> PathBuf {
        self.project_dir(&key.project)
            .join("builds")
            .join(key.number.0.to_string())
    }

    /// Lists the child project names of a project directory, sorted.
    fn items(&self, project_dir: &Path) -> Result<Vec<String>> {
        let items_dir = project_dir.join("items");
        let read_dir = match std::fs::read_dir(&items_dir) {
            Ok(rd) => rd,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error(&items_dir, e)),
        };

        let mut items = Vec::new();
        for entry in read_dir {
            let entry = entry.map_err(|e| io_error(&items_dir, e))?;
            let path = entry.path();
            if path.join(CONFIG_FILE).is_file()
                && let Some(name) = entry.file_name().to_str()
            {
                items.push(name.to_string());
            }
        }
        items.sort();
        Ok(items)
    }

    /// Computes the effective result of a build.
    ///
    /// A recorded result always wins. A composite build with no recorded result
    /// takes the worst of its children's results, or success if none resolve.
    fn effective_result(&self, project: &ProjectRef, metadata: &BuildMetadata) -> BuildResult {
        if let Some(result) = metadata.result {
            return result;
        }
        if !project.kind.is_composite() {
            return BuildResult::NotBuilt;
        }

        metadata
            .children
            .iter()
            .filter_map(|child| {
                let key = BuildKey::new(project.name.child(&child.item), child.number);
                read_metadata(&self.build_dir(&key)).ok()?.result
            })
            .fold(BuildResult::Success, BuildResult::combine)
    }
}

impl BuildStore for FsBuildStore {
    fn resolve(&self, key: &BuildKey) -> Result<Option<BuildRef>> {
        let Some(project) = self.project(&key.project)? else {
            return Ok(None);
        };

        let root_dir = self.build_dir(key);
        let metadata = match read_metadata(&root_dir) {
            Ok(m) => m,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error(&root_dir, e)),
        };

        if metadata.number != key.number {
            warn!(
                build = %key,
                recorded = %metadata.number,
                "Build record number does not match its directory"
            );
        }

        let result = self.effective_result(&project, &metadata);
        let children = metadata
            .children
            .iter()
            .map(|child| BuildKey::new(project.name.child(&child.item), child.number))
            .collect();

        Ok(Some(BuildRef {
            key: key.clone(),
            project,
            root_dir,
            result,
            children,
        }))
    }

    fn project(&self, name: &ProjectName) -> Result<Option<ProjectRef>> {
        let dir = self.project_dir(name);
        let config = match read_config(&dir) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error(&dir.join(CONFIG_FILE), e)),
        };

        Ok(Some(ProjectRef {
            name: name.clone(),
            kind: config.kind,
            items: self.items(&dir)?,
        }))
    }

    fn project_config(&self, name: &ProjectName) -> Result<ProjectConfig> {
        let dir = self.project_dir(name);
        match read_config(&dir) {
            Ok(c) => Ok(c),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(StoreError::ProjectNotFound(name.clone()))
            }
            Err(e) => Err(io_error(&dir.join(CONFIG_FILE), e)),
        }
    }
}

fn io_error(path: &Path, source: io::Error) -> StoreError {
    StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}
