//! Configuration rewrite applied before a project is sent to a remote.

use crate::builds::ProjectConfig;
use crate::builds::config::{BUILD_PUBLISHER, EXTERNAL_BUILDS_PROPERTY, MAILER};

/// Rewrites project configurations for remotes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConfigRewrite {
    /// Drop all triggers so the remote never starts builds of its own.
    pub remove_triggers: bool,
}

impl ConfigRewrite {
    /// Returns the remote form of `config`.
    ///
    /// The remote project accepts incoming builds, does not send mail and does
    /// not republish.
    pub fn apply(&self, config: &ProjectConfig) -> ProjectConfig {
        let mut remote = config.clone();

        if !remote.properties.iter().any(|p| p == EXTERNAL_BUILDS_PROPERTY) {
            remote.properties.push(EXTERNAL_BUILDS_PROPERTY.to_string());
        }
        remote
            .publishers
            .retain(|p| p.kind != MAILER && p.kind != BUILD_PUBLISHER);
        if self.remove_triggers {
            remote.triggers.clear();
        }

        remote
    }
}
