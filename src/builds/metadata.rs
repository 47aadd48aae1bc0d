//! The per-build metadata record (`build.json`).
//!
//! The record belongs to the local build server. The publisher reads it, writes
//! its own status records into the `publishing` section, and sends a rewritten
//! copy to remotes as the last archive entry. Fields the publisher does not know
//! about are preserved verbatim.

use std::collections::BTreeMap;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::persistence::write_atomic;
use crate::types::{BuildNumber, BuildResult, StatusRecord, TargetName};

/// File name of the metadata record inside a build directory.
pub const METADATA_FILE: &str = "build.json";

/// A child build referenced by a composite build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildBuild {
    /// Short name of the child project inside the parent project.
    pub item: String,
    pub number: BuildNumber,
}

/// The metadata record of one build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildMetadata {
    pub number: BuildNumber,

    /// Time-based build identifier, if the build server assigns one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Recorded result. Composite builds may leave this unset and rely on
    /// their children.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<BuildResult>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ChildBuild>,

    /// Publishing status, one record per target.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub publishing: BTreeMap<TargetName, StatusRecord>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl BuildMetadata {
    pub fn new(number: impl Into<BuildNumber>) -> Self {
        BuildMetadata {
            number: number.into(),
            id: None,
            result: None,
            children: Vec::new(),
            publishing: BTreeMap::new(),
            extra: Map::new(),
        }
    }
}

/// Reads the metadata record from a build directory.
pub fn read_metadata(build_dir: &Path) -> io::Result<BuildMetadata> {
    let bytes = std::fs::read(build_dir.join(METADATA_FILE))?;
    serde_json::from_slice(&bytes).map_err(io::Error::from)
}

/// Writes the metadata record of a build directory atomically.
pub fn write_metadata(build_dir: &Path, metadata: &BuildMetadata) -> io::Result<()> {
    let bytes = serde_json::to_vec_pretty(metadata).map_err(io::Error::from)?;
    write_atomic(&build_dir.join(METADATA_FILE), &bytes)
}
