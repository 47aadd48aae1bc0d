//! Service configuration.
//!
//! Read from a JSON file, then selectively overridden from the environment:
//!
//! | Variable | Overrides |
//! |---|---|
//! | `BUILD_PUBLISHER_CONFIG` | path of the file (default `build-publisher.json`) |
//! | `BUILD_PUBLISHER_LISTEN` | `listen_addr` |
//! | `BUILD_PUBLISHER_STATE_DIR` | `state_dir` |
//! | `BUILD_PUBLISHER_BUILDS_ROOT` | `builds_root` |
//! | `BUILD_PUBLISHER_RECOVERY_SECS` | `recovery_window_secs` |
//!
//! A missing file is not an error; every field has a default, and a service
//! with no targets simply publishes nothing.

use std::collections::HashSet;
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::Url;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::sync::ConfigRewrite;
use crate::target::TargetSettings;
use crate::transfer::{Credentials, RemoteEndpoint};
use crate::types::TargetName;
use crate::worker::{DEFAULT_RECOVERY_WINDOW, DEFAULT_REQUEST_TIMEOUT, WorkerOptions};

pub const CONFIG_ENV: &str = "BUILD_PUBLISHER_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "build-publisher.json";

/// Errors from loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid value for {variable}: {value:?}")]
    Env { variable: &'static str, value: String },

    #[error("invalid target name {0:?}")]
    TargetName(String),

    #[error("target {0} is configured more than once")]
    DuplicateTarget(TargetName),

    #[error("target {name} has an invalid URL {url:?}: {reason}")]
    TargetUrl {
        name: TargetName,
        url: String,
        reason: String,
    },

    #[error("target {0} has a login but no password")]
    IncompleteCredentials(TargetName),

    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublisherConfig {
    pub listen_addr: SocketAddr,

    /// Directory for queue files.
    pub state_dir: PathBuf,

    /// Root of the local build server's job tree.
    pub builds_root: PathBuf,

    /// Strip triggers from configurations sent to remotes.
    pub remove_triggers: bool,

    /// Originating timezone announced with every build.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,

    pub recovery_window_secs: u64,
    pub request_timeout_secs: u64,

    pub targets: Vec<TargetConfig>,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        PublisherConfig {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            state_dir: PathBuf::from("state"),
            builds_root: PathBuf::from("builds"),
            remove_triggers: false,
            timezone: None,
            recovery_window_secs: DEFAULT_RECOVERY_WINDOW.as_secs(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT.as_secs(),
            targets: Vec::new(),
        }
    }
}

/// One configured remote target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetConfig {
    pub name: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub login: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl PublisherConfig {
    /// Loads configuration from the file named by `BUILD_PUBLISHER_CONFIG`
    /// and applies environment overrides.
    pub fn load() -> Result<Self> {
        Self::load_with(|name| std::env::var(name).ok())
    }

    /// Like [`PublisherConfig::load`], reading variables through `env`.
    pub fn load_with(env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let path = env(CONFIG_ENV).unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
        let mut config = Self::from_file(Path::new(&path))?;
        config.apply_env(env)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects settings the workers cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.recovery_window_secs == 0 {
            return Err(ConfigError::ZeroDuration("recovery_window_secs"));
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::ZeroDuration("request_timeout_secs"));
        }
        Ok(())
    }

    /// Reads a configuration file. A missing file yields the defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source: e,
                });
            }
        };
        serde_json::from_slice(&bytes).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    fn apply_env(&mut self, env: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(value) = env("BUILD_PUBLISHER_LISTEN") {
            self.listen_addr = value.parse().map_err(|_| ConfigError::Env {
                variable: "BUILD_PUBLISHER_LISTEN",
                value,
            })?;
        }
        if let Some(value) = env("BUILD_PUBLISHER_STATE_DIR") {
            self.state_dir = PathBuf::from(value);
        }
        if let Some(value) = env("BUILD_PUBLISHER_BUILDS_ROOT") {
            self.builds_root = PathBuf::from(value);
        }
        if let Some(value) = env("BUILD_PUBLISHER_RECOVERY_SECS") {
            self.recovery_window_secs = value.parse().map_err(|_| ConfigError::Env {
                variable: "BUILD_PUBLISHER_RECOVERY_SECS",
                value,
            })?;
        }
        Ok(())
    }

    /// Validates the target list and converts it to target settings.
    pub fn target_settings(&self) -> Result<Vec<TargetSettings>> {
        let mut seen = HashSet::new();
        self.targets
            .iter()
            .map(|target| {
                let settings = target.to_settings()?;
                if !seen.insert(settings.name.clone()) {
                    return Err(ConfigError::DuplicateTarget(settings.name));
                }
                Ok(settings)
            })
            .collect()
    }

    pub fn worker_options(&self) -> WorkerOptions {
        WorkerOptions {
            recovery_window: Duration::from_secs(self.recovery_window_secs),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            rewrite: ConfigRewrite {
                remove_triggers: self.remove_triggers,
            },
            timezone: self.timezone.clone(),
        }
    }
}

impl TargetConfig {
    fn to_settings(&self) -> Result<TargetSettings> {
        let name =
            TargetName::parse(self.name.as_str()).map_err(|_| ConfigError::TargetName(self.name.clone()))?;

        let url_error = |reason: String| ConfigError::TargetUrl {
            name: name.clone(),
            url: self.url.clone(),
            reason,
        };
        let mut url = Url::parse(&self.url).map_err(|e| url_error(e.to_string()))?;
        if url.cannot_be_a_base() || !matches!(url.scheme(), "http" | "https") {
            return Err(url_error("expected an http or https base URL".into()));
        }
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }

        let credentials = match (&self.login, &self.password) {
            (Some(login), Some(password)) => Some(Credentials {
                login: login.clone(),
                password: password.clone(),
            }),
            (Some(_), None) => return Err(ConfigError::IncompleteCredentials(name)),
            (None, _) => None,
        };

        Ok(TargetSettings {
            name,
            endpoint: RemoteEndpoint { url, credentials },
        })
    }
}
