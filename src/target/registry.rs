//! The set of configured remote targets.
//!
//! Owned by the application and passed to whatever needs targets; there is no
//! process-wide registry. [`TargetRegistry::reconfigure`] applies a new target
//! list: unchanged targets keep running, changed ones restart with their queue
//! reloaded from disk, removed ones shut down.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use super::target::{RemoteTarget, TargetSettings};
use crate::builds::StoreError;
use crate::types::{BuildKey, BuildResult, TargetName};
use crate::worker::WorkerContext;

/// Errors from the publish trigger.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Why a completed build was not queued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    BuildNotFound,
    /// The project has no build publisher settings.
    NotConfigured,
    /// Child builds are published through their parent.
    ChildBuild,
    /// The result is not one the project publishes.
    ResultFiltered { result: BuildResult },
    UnknownTarget { target: TargetName },
}

/// Outcome of [`TargetRegistry::on_build_completed`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TriggerOutcome {
    Enqueued { target: TargetName },
    Skipped(SkipReason),
}

/// All configured remote targets.
pub struct TargetRegistry {
    ctx: WorkerContext,
    targets: RwLock<BTreeMap<TargetName, Arc<RemoteTarget>>>,
}

impl TargetRegistry {
    /// Creates and starts every configured target.
    ///
    /// Must be called within a tokio runtime.
    pub fn load(ctx: WorkerContext, settings: Vec<TargetSettings>) -> Self {
        let targets = settings
            .into_iter()
            .map(|s| (s.name.clone(), RemoteTarget::start(s, ctx.clone())))
            .collect();
        TargetRegistry {
            ctx,
            targets: RwLock::new(targets),
        }
    }

    pub fn context(&self) -> &WorkerContext {
        &self.ctx
    }

    pub fn get(&self, name: &TargetName) -> Option<Arc<RemoteTarget>> {
        self.read().get(name).cloned()
    }

    /// Returns all targets ordered by name.
    pub fn targets(&self) -> Vec<Arc<RemoteTarget>> {
        self.read().values().cloned().collect()
    }

    /// Applies a new target list.
    pub async fn reconfigure(&self, settings: Vec<TargetSettings>) {
        let mut wanted: BTreeMap<TargetName, TargetSettings> =
            settings.into_iter().map(|s| (s.name.clone(), s)).collect();

        let stopping: Vec<Arc<RemoteTarget>> = {
            let mut targets = self.write();
            let stale: Vec<TargetName> = targets
                .iter()
                .filter(|(name, target)| wanted.get(*name) != Some(target.settings()))
                .map(|(name, _)| name.clone())
                .collect();
            stale.iter().filter_map(|name| targets.remove(name)).collect()
        };

        for target in &stopping {
            info!(remote = %target.name(), "Stopping reconfigured target");
            target.shutdown().await;
        }

        let mut targets = self.write();
        wanted.retain(|name, _| !targets.contains_key(name));
        for (name, settings) in wanted {
            info!(remote = %name, "Starting target");
            targets.insert(name, RemoteTarget::start(settings, self.ctx.clone()));
        }
    }

    /// Queues a completed build on the target its project publishes to.
    pub fn on_build_completed(&self, key: &BuildKey) -> Result<TriggerOutcome, RegistryError> {
        let Some(build) = self.ctx.store.resolve(key)? else {
            return Ok(TriggerOutcome::Skipped(SkipReason::BuildNotFound));
        };
        if build.is_child_build() {
            return Ok(TriggerOutcome::Skipped(SkipReason::ChildBuild));
        }

        let config = self.ctx.store.project_config(&build.project.name)?;
        let Some(settings) = config.publisher_settings() else {
            return Ok(TriggerOutcome::Skipped(SkipReason::NotConfigured));
        };

        let publish = match build.result {
            BuildResult::Success => true,
            BuildResult::Unstable => settings.publish_unstable,
            BuildResult::Failure => settings.publish_failed,
            BuildResult::NotBuilt | BuildResult::Aborted => false,
        };
        if !publish {
            debug!(build = %key, result = ?build.result, "Build result not published");
            return Ok(TriggerOutcome::Skipped(SkipReason::ResultFiltered {
                result: build.result,
            }));
        }

        let Some(target) = self.get(&settings.target) else {
            return Ok(TriggerOutcome::Skipped(SkipReason::UnknownTarget {
                target: settings.target,
            }));
        };

        target.publish_new_build(build);
        info!(remote = %target.name(), build = %key, "Build queued for publishing");
        Ok(TriggerOutcome::Enqueued {
            target: settings.target,
        })
    }

    /// Stops every worker.
    pub async fn shutdown(&self) {
        let targets = self.targets();
        for target in targets {
            target.shutdown().await;
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<TargetName, Arc<RemoteTarget>>> {
        self.targets.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<TargetName, Arc<RemoteTarget>>> {
        self.targets.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for TargetRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TargetRegistry")
            .field("targets", &self.read().keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}
