//! Newtype wrappers for domain identifiers.
//!
//! These types prevent accidental mixing of different identifiers (e.g., using a
//! target name where a project name is expected) and make the code more
//! self-documenting.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Full name of a project on the local build server.
///
/// Top-level projects have a single segment (`"app"`). Child projects (modules
/// of a multi-module project, sub-configurations of a matrix project) are named
/// by their path from the top-level project, joined with `/` (`"app/core"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectName(pub String);

impl ProjectName {
    /// Creates a new project name from its full `/`-joined path.
    pub fn new(s: impl Into<String>) -> Self {
        ProjectName(s.into())
    }

    /// Returns the full name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the path segments of the full name.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|s| !s.is_empty())
    }

    /// Returns the last segment of the full name.
    ///
    /// This is the name the project is known by inside its parent, and the
    /// identity a remote server echoes back when it confirms a received build.
    pub fn short_name(&self) -> &str {
        self.segments().last().unwrap_or(&self.0)
    }

    /// Returns the full name of the parent project, if this is a child project.
    pub fn parent(&self) -> Option<ProjectName> {
        let trimmed = self.0.trim_end_matches('/');
        trimmed
            .rfind('/')
            .map(|idx| ProjectName(trimmed[..idx].to_string()))
    }

    /// Returns the full name of a child item of this project.
    pub fn child(&self, item: &str) -> ProjectName {
        ProjectName(format!("{}/{}", self.0.trim_end_matches('/'), item))
    }
}

impl fmt::Display for ProjectName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ProjectName {
    fn from(s: &str) -> Self {
        ProjectName(s.to_string())
    }
}

impl From<String> for ProjectName {
    fn from(s: String) -> Self {
        ProjectName(s)
    }
}

/// A build number within a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BuildNumber(pub u64);

impl fmt::Display for BuildNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<u64> for BuildNumber {
    fn from(n: u64) -> Self {
        BuildNumber(n)
    }
}

/// Identity of one build: the project's full name plus the build number.
///
/// This is also the lightweight record persisted in queue files.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BuildKey {
    pub project: ProjectName,
    pub number: BuildNumber,
}

impl BuildKey {
    pub fn new(project: impl Into<ProjectName>, number: impl Into<BuildNumber>) -> Self {
        BuildKey {
            project: project.into(),
            number: number.into(),
        }
    }
}

impl fmt::Display for BuildKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.project, self.number)
    }
}

/// Error returned when a remote target name is unusable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid target name {0:?}: must be non-empty and must not contain path separators or start with '.'")]
pub struct InvalidTargetName(pub String);

/// Unique name of a configured remote target.
///
/// Target names are used to build the per-target queue file name, so they are
/// restricted to filename-safe values.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TargetName(String);

impl TargetName {
    /// Parses and validates a target name.
    pub fn parse(s: impl Into<String>) -> Result<Self, InvalidTargetName> {
        let s = s.into();
        if s.trim().is_empty()
            || s.starts_with('.')
            || s.contains('/')
            || s.contains('\\')
            || s.contains('\0')
        {
            return Err(InvalidTargetName(s));
        }
        Ok(TargetName(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for TargetName {
    type Error = InvalidTargetName;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        TargetName::parse(s)
    }
}

impl From<TargetName> for String {
    fn from(name: TargetName) -> Self {
        name.0
    }
}

impl fmt::Display for TargetName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod project_name {
        use super::*;
        use proptest::prelude::*;

        #[test]
        fn short_name_of_top_level_project() {
            assert_eq!(ProjectName::new("app").short_name(), "app");
        }

        #[test]
        fn short_name_of_child_project() {
            assert_eq!(ProjectName::new("app/core").short_name(), "core");
        }

        #[test]
        fn parent_of_child() {
            assert_eq!(
                ProjectName::new("app/core/x").parent(),
                Some(ProjectName::new("app/core"))
            );
            assert_eq!(ProjectName::new("app").parent(), None);
        }

        #[test]
        fn child_joins_with_slash() {
            assert_eq!(
                ProjectName::new("app").child("os=linux"),
                ProjectName::new("app/os=linux")
            );
        }

        proptest! {
            #[test]
            fn child_then_parent_is_identity(
                parent in "[a-zA-Z0-9_-]{1,20}",
                item in "[a-zA-Z0-9_=-]{1,20}"
            ) {
                let name = ProjectName::new(&parent);
                let child = name.child(&item);
                prop_assert_eq!(child.parent(), Some(name));
                prop_assert_eq!(child.short_name(), item.as_str());
            }
        }
    }

    mod build_key {
        use super::*;

        #[test]
        fn display_format() {
            let key = BuildKey::new("app", 12);
            assert_eq!(key.to_string(), "app #12");
        }

        #[test]
        fn serializes_as_project_number_pair() {
            let key = BuildKey::new("app/core", 3);
            let json = serde_json::to_value(&key).unwrap();
            assert_eq!(json, serde_json::json!({"project": "app/core", "number": 3}));
        }
    }

    mod target_name {
        use super::*;

        #[test]
        fn accepts_plain_names() {
            assert!(TargetName::parse("public-ci").is_ok());
            assert!(TargetName::parse("Public CI 2").is_ok());
        }

        #[test]
        fn rejects_unsafe_names() {
            assert!(TargetName::parse("").is_err());
            assert!(TargetName::parse("   ").is_err());
            assert!(TargetName::parse("../etc").is_err());
            assert!(TargetName::parse("a/b").is_err());
            assert!(TargetName::parse("a\\b").is_err());
            assert!(TargetName::parse(".hidden").is_err());
        }

        #[test]
        fn deserialize_validates() {
            let bad: Result<TargetName, _> = serde_json::from_str("\"a/b\"");
            assert!(bad.is_err());
            let good: TargetName = serde_json::from_str("\"public\"").unwrap();
            assert_eq!(good.as_str(), "public");
        }
    }
}
