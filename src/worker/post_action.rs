//! Callbacks run after a build was published.
//!
//! Post-actions observe successful publishes. Their failures are logged and
//! never change the outcome or status of the publish.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;

use futures::FutureExt;
use tracing::{info, warn};

use super::supervisor::panic_message;

use crate::types::{BuildRef, TargetName};

/// Boxed future returned by [`PostAction::run`].
pub type PostActionFuture<'a> = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>>;

/// A callback run after each successful publish.
pub trait PostAction: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    fn run<'a>(&'a self, build: &'a BuildRef, target: &'a TargetName) -> PostActionFuture<'a>;
}

/// Ordered list of post-actions shared by all targets.
#[derive(Clone, Default)]
pub struct PostActions {
    actions: Vec<Arc<dyn PostAction>>,
}

impl PostActions {
    pub fn new() -> Self {
        PostActions::default()
    }

    pub fn with(mut self, action: impl PostAction + 'static) -> Self {
        self.actions.push(Arc::new(action));
        self
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Runs every action in order. Returns the number that failed.
    ///
    /// A panicking action counts as failed.
    pub async fn run_all(&self, build: &BuildRef, target: &TargetName) -> usize {
        let mut failed = 0;
        for action in &self.actions {
            let outcome = AssertUnwindSafe(action.run(build, target))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(anyhow::anyhow!("panicked: {}", panic_message(panic.as_ref()))));
            if let Err(e) = outcome {
                failed += 1;
                let error = format!("{e:#}");
                warn!(
                    build = %build.key,
                    action = action.name(),
                    error = %error,
                    "Post-action failed"
                );
            }
        }
        failed
    }
}

impl std::fmt::Debug for PostActions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.actions.iter().map(|a| a.name()))
            .finish()
    }
}

/// Records every successful publish in the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct AuditLog;

impl PostAction for AuditLog {
    fn name(&self) -> &str {
        "audit-log"
    }

    fn run<'a>(&'a self, build: &'a BuildRef, target: &'a TargetName) -> PostActionFuture<'a> {
        Box::pin(async move {
            info!(
                build = %build.key,
                remote = %target,
                result = ?build.result,
                children = build.children.len(),
                "Build published"
            );
            Ok(())
        })
    }
}
