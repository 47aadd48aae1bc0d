//! Project configuration records (`config.json`).
//!
//! Like build metadata, project configurations belong to the local build server.
//! The publisher reads its own settings from the `build-publisher` publisher
//! entry and sends a rewritten copy of the whole configuration to remotes.

use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::{ProjectKind, TargetName};

/// File name of the configuration record inside a project directory.
pub const CONFIG_FILE: &str = "config.json";

/// Publisher entry type for this publisher.
pub const BUILD_PUBLISHER: &str = "build-publisher";

/// Publisher entry type for mail notifications.
pub const MAILER: &str = "mailer";

/// Project property that lets a remote project accept incoming builds.
pub const EXTERNAL_BUILDS_PROPERTY: &str = "external-builds";

/// One entry of a project's publisher list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublisherEntry {
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(flatten)]
    pub settings: Map<String, Value>,
}

/// Per-project settings of the build publisher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublisherSettings {
    /// Name of the remote target builds of this project go to.
    pub target: TargetName,

    /// Publish builds whose result is unstable.
    #[serde(default)]
    pub publish_unstable: bool,

    /// Publish builds whose result is failure.
    #[serde(default)]
    pub publish_failed: bool,
}

/// A project's configuration record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectConfig {
    #[serde(default)]
    pub kind: ProjectKind,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub properties: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub publishers: Vec<PublisherEntry>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub triggers: Vec<Value>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ProjectConfig {
    pub fn new(kind: ProjectKind) -> Self {
        ProjectConfig {
            kind,
            properties: Vec::new(),
            publishers: Vec::new(),
            triggers: Vec::new(),
            extra: Map::new(),
        }
    }

    /// Returns this project's build publisher settings, if configured.
    ///
    /// An entry that does not parse is treated as absent.
    pub fn publisher_settings(&self) -> Option<PublisherSettings> {
        self.publishers
            .iter()
            .find(|p| p.kind == BUILD_PUBLISHER)
            .and_then(|p| serde_json::from_value(Value::Object(p.settings.clone())).ok())
    }
}

/// Reads the configuration record from a project directory.
pub fn read_config(project_dir: &Path) -> io::Result<ProjectConfig> {
    let bytes = std::fs::read(project_dir.join(CONFIG_FILE))?;
    serde_json::from_slice(&bytes).map_err(io::Error::from)
}
