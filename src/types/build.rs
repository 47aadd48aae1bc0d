//! Builds and projects as seen by the publishing pipeline.
//!
//! The local build server owns these records. The pipeline only reads them,
//! except for the publishing status record attached to each build.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::ids::{BuildKey, BuildNumber, ProjectName};

/// The kind of a project.
///
/// Composite kinds own child projects (`items`). The pipeline never branches on
/// the composite flavour when synchronizing: any project that exposes items is
/// recursed into. The flavour only matters for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectKind {
    /// A plain leaf project.
    #[default]
    Plain,
    /// A multi-module project whose children are module projects.
    MultiModule,
    /// A matrix project whose children are sub-configurations.
    Matrix,
    /// A module of a multi-module project.
    Module,
    /// A sub-configuration of a matrix project.
    SubConfiguration,
}

impl ProjectKind {
    /// Returns true for kinds that aggregate child builds.
    pub fn is_composite(&self) -> bool {
        matches!(self, ProjectKind::MultiModule | ProjectKind::Matrix)
    }
}

/// A project on the local build server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectRef {
    /// Full `/`-joined name of the project.
    pub name: ProjectName,

    /// Project kind as declared in its configuration.
    pub kind: ProjectKind,

    /// Short names of the child projects, in a stable order.
    pub items: Vec<String>,
}

impl ProjectRef {
    /// Returns the parent project's full name, if this is a child project.
    pub fn parent(&self) -> Option<ProjectName> {
        self.name.parent()
    }

    /// Returns true if this project has child projects.
    pub fn has_items(&self) -> bool {
        !self.items.is_empty()
    }
}

/// The outcome of a build, ordered from best to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BuildResult {
    Success,
    Unstable,
    Failure,
    NotBuilt,
    Aborted,
}

impl BuildResult {
    /// Combines two results, keeping the worse one.
    pub fn combine(self, other: BuildResult) -> BuildResult {
        self.max(other)
    }
}

/// A reference to one completed build.
///
/// Equality is identity: two references are equal iff they point at the same
/// project and build number.
#[derive(Debug, Clone)]
pub struct BuildRef {
    /// Project full name and build number.
    pub key: BuildKey,

    /// The project the build belongs to.
    pub project: ProjectRef,

    /// Directory holding the build's files and its metadata record.
    pub root_dir: PathBuf,

    /// The build's effective result.
    ///
    /// For composite builds whose record carries no explicit result this is
    /// the worst result among the child builds.
    pub result: BuildResult,

    /// Immediate child builds (module builds or sub-configuration runs).
    pub children: Vec<BuildKey>,
}

impl BuildRef {
    pub fn number(&self) -> BuildNumber {
        self.key.number
    }

    /// Returns true if this build belongs to a child project.
    pub fn is_child_build(&self) -> bool {
        self.project.parent().is_some()
    }
}

impl PartialEq for BuildRef {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for BuildRef {}
