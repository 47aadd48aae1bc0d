//! The publishing worker loop.
//!
//! One worker drains one target's queue, one build at a time:
//!
//! ```text
//! Idle ──next build──▶ Publishing ──ok──▶ Idle
//!                         │
//!                         ├─retryable──▶ ErrorRecoveryWait ──deadline / retry-now──▶ Idle
//!                         ├─interrupted─▶ Idle (build removed, INTERRUPTED)
//!                         └─fatal──────▶ Dead
//! ```
//!
//! A publish is: sync the remote project, package and send the archive, check
//! the receipt, enqueue child builds, run post-actions. The build stays queued
//! until it succeeds or is interrupted; a failure moves it to the tail.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::post_action::PostActions;
use super::state::{WorkerControl, WorkerState};
use crate::archive::{self, ArchiveError};
use crate::builds::{BuildStore, StoreError, read_metadata};
use crate::status::StatusTracker;
use crate::sync::{ConfigRewrite, RemoteSync, SyncError};
use crate::target::RequestQueue;
use crate::transfer::{
    BUILD_ID_HEADER, RECEIPT_HEADER, RequestBody, TIMEZONE_HEADER, TransferClient, TransferError,
    TransferRequest, endpoints,
};
use crate::types::{
    BuildKey, BuildRef, FailedExchange, RecordedError, StatusRecord, TargetName,
};

/// Default error-recovery window.
pub const DEFAULT_RECOVERY_WINDOW: Duration = Duration::from_secs(600);

/// Default timeout for connecting and for non-archive requests.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Message recorded when an operator aborts a transfer.
pub const ABORTED_MESSAGE: &str = "Transmission aborted by operator";

/// Tunables shared by all workers.
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    /// How long to wait after a failed publish before the next attempt.
    pub recovery_window: Duration,
    pub request_timeout: Duration,
    pub rewrite: ConfigRewrite,
    /// Value of the originating-timezone header, if any.
    pub timezone: Option<String>,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        WorkerOptions {
            recovery_window: DEFAULT_RECOVERY_WINDOW,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            rewrite: ConfigRewrite::default(),
            timezone: None,
        }
    }
}

/// Everything a worker needs besides its own target.
#[derive(Clone)]
pub struct WorkerContext {
    pub store: Arc<dyn BuildStore>,
    pub tracker: Arc<StatusTracker>,
    pub post_actions: PostActions,
    pub options: WorkerOptions,
    /// Directory holding the queue files.
    pub state_dir: PathBuf,
}

impl std::fmt::Debug for WorkerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerContext")
            .field("post_actions", &self.post_actions)
            .field("options", &self.options)
            .field("state_dir", &self.state_dir)
            .finish_non_exhaustive()
    }
}

/// How the worker reacts to a failed publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Keep the build queued and retry after the recovery window.
    Retryable,
    /// Remove the build as INTERRUPTED; an operator has to act.
    Interrupted,
    /// Stop the worker.
    Fatal,
}

/// Errors from one publish attempt.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("remote synchronization failed")]
    Sync(#[from] SyncError),

    #[error("build transfer failed")]
    Transfer(#[from] TransferError),

    #[error("build packaging failed")]
    Archive(#[from] ArchiveError),

    #[error("failed to read build")]
    Store(#[from] StoreError),
}

impl PublishError {
    pub fn class(&self) -> ErrorClass {
        if self.is_aborted() {
            return ErrorClass::Interrupted;
        }
        match self {
            PublishError::Sync(SyncError::ParentMissing { .. }) => ErrorClass::Interrupted,
            PublishError::Sync(SyncError::Encode { .. }) => ErrorClass::Fatal,
            PublishError::Archive(ArchiveError::Task(_)) => ErrorClass::Fatal,
            _ => ErrorClass::Retryable,
        }
    }

    /// Returns true if an operator abort caused this failure.
    pub fn is_aborted(&self) -> bool {
        matches!(
            self,
            PublishError::Transfer(TransferError::Aborted)
                | PublishError::Sync(SyncError::Transfer(TransferError::Aborted))
                | PublishError::Archive(ArchiveError::Aborted)
        )
    }

    /// The server exchange behind this failure, if any.
    pub fn exchange(&self) -> Option<&FailedExchange> {
        match self {
            PublishError::Sync(e) => e.exchange(),
            PublishError::Transfer(e) => e.exchange(),
            _ => None,
        }
    }

    fn recorded(&self) -> RecordedError {
        RecordedError::from_error(self).with_exchange(self.exchange().cloned())
    }
}

/// Errors that stop a worker.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("unrecoverable error while publishing {build}")]
    Fatal {
        build: BuildKey,
        #[source]
        source: PublishError,
    },
}

/// Drains one target's queue.
pub struct PublishingWorker {
    target: TargetName,
    client: TransferClient,
    queue: Arc<RequestQueue>,
    control: Arc<WorkerControl>,
    ctx: WorkerContext,
}

impl PublishingWorker {
    pub fn new(
        target: TargetName,
        client: TransferClient,
        queue: Arc<RequestQueue>,
        control: Arc<WorkerControl>,
        ctx: WorkerContext,
    ) -> Self {
        PublishingWorker {
            target,
            client,
            queue,
            control,
            ctx,
        }
    }

    /// Runs until `shutdown` is cancelled or a fatal error occurs.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), WorkerError> {
        info!(remote = %self.target, url = %self.client.base(), "Publishing worker started");

        loop {
            self.control.set_state(WorkerState::Idle);

            let queued = tokio::select! {
                _ = shutdown.cancelled() => break,
                build = self.queue.next_blocking() => build,
            };
            let key = queued.key.clone();

            let build = match self.ctx.store.resolve(&key) {
                Ok(Some(build)) => build,
                Ok(None) => {
                    warn!(remote = %self.target, build = %key, "Queued build no longer exists; dropping it");
                    self.queue.forget(&key);
                    continue;
                }
                Err(e) => {
                    if !self.recover(&queued, PublishError::Store(e), &shutdown).await {
                        break;
                    }
                    continue;
                }
            };

            let cancel = shutdown.child_token();
            self.control.begin(key.clone(), cancel.clone());
            self.control.set_state(WorkerState::Publishing {
                build: key.clone(),
                since: Utc::now(),
            });
            self.queue
                .update_status(&key, StatusRecord::in_progress(self.target.clone()));

            let result = self.publish(&build, &cancel).await;
            self.control.finish();

            match result {
                Ok(()) => {
                    self.queue
                        .remove(&key, StatusRecord::success(self.target.clone()));
                    info!(remote = %self.target, build = %key, "Build published");
                }
                Err(_) if shutdown.is_cancelled() => {
                    self.queue
                        .update_status(&key, StatusRecord::pending(self.target.clone()));
                    break;
                }
                Err(e) => match e.class() {
                    ErrorClass::Retryable => {
                        if !self.recover(&build, e, &shutdown).await {
                            break;
                        }
                    }
                    ErrorClass::Interrupted => self.interrupt(&key, e),
                    ErrorClass::Fatal => {
                        error!(remote = %self.target, build = %key, error = %e.recorded().message, "Worker stopping on fatal error");
                        return Err(WorkerError::Fatal {
                            build: key,
                            source: e,
                        });
                    }
                },
            }
        }

        info!(remote = %self.target, "Publishing worker stopped");
        Ok(())
    }

    #[instrument(skip_all, fields(remote = %self.target, build = %build.key))]
    async fn publish(&self, build: &BuildRef, cancel: &CancellationToken) -> Result<(), PublishError> {
        RemoteSync::new(
            &self.client,
            self.ctx.store.as_ref(),
            self.ctx.options.rewrite,
            cancel,
        )
        .synchronize(&build.project)
        .await?;

        self.transfer(build, cancel).await?;

        for child in &build.children {
            match self.ctx.store.resolve(child) {
                Ok(Some(child_build)) => {
                    debug!(child = %child, "Enqueuing child build");
                    self.queue
                        .enqueue(child_build, StatusRecord::pending(self.target.clone()));
                }
                Ok(None) => warn!(child = %child, "Child build no longer exists"),
                Err(e) => return Err(PublishError::Store(e)),
            }
        }

        self.ctx.post_actions.run_all(build, &self.target).await;
        Ok(())
    }

    /// Packages and sends the archive, then checks the receipt.
    async fn transfer(&self, build: &BuildRef, cancel: &CancellationToken) -> Result<(), PublishError> {
        let archive = archive::package(build.clone(), cancel.clone()).await?;
        debug!(entries = archive.entries, size = archive.size, "Sending build archive");

        let mut request = TransferRequest::post(
            endpoints::build_accept(self.client.base(), &build.project.name)?,
            RequestBody::archive(archive.path()),
        )
        .header(BUILD_ID_HEADER, build_id(build));
        if let Some(timezone) = &self.ctx.options.timezone {
            request = request.header(TIMEZONE_HEADER, timezone.clone());
        }

        let response = self.client.execute(request, cancel).await?;

        let expected = build.project.name.short_name();
        let received = response.header(RECEIPT_HEADER).map(str::to_string);
        if received.as_deref() != Some(expected) {
            return Err(TransferError::MissingReceipt {
                expected: expected.to_string(),
                received,
                exchange: Box::new(response.into_exchange()),
            }
            .into());
        }
        Ok(())
    }

    /// Records a retryable failure, postpones the build and waits.
    ///
    /// Returns false if shutdown was requested while waiting.
    async fn recover(&self, build: &BuildRef, error: PublishError, shutdown: &CancellationToken) -> bool {
        let recorded = error.recorded();
        warn!(
            remote = %self.target,
            build = %build.key,
            error = %recorded.message,
            "Publishing failed; waiting before the next attempt"
        );

        self.queue.move_to_tail(
            &build.key,
            StatusRecord::failure_pending(self.target.clone(), recorded.clone()),
        );

        let window = self.ctx.options.recovery_window;
        let deadline = Instant::now() + window;

        let retry = self.control.retry_requested();
        tokio::pin!(retry);
        retry.as_mut().enable();

        self.control.set_state(WorkerState::ErrorRecoveryWait {
            deadline: wall_clock_deadline(window),
            build: build.key.clone(),
            cause: recorded.message,
            failed_exchange: recorded.exchange,
        });

        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => debug!(remote = %self.target, "Recovery window elapsed"),
            _ = &mut retry => info!(remote = %self.target, "Retry requested"),
            _ = shutdown.cancelled() => return false,
        }
        true
    }

    fn interrupt(&self, key: &BuildKey, error: PublishError) {
        let message = if error.is_aborted() {
            ABORTED_MESSAGE.to_string()
        } else {
            error.recorded().message
        };
        warn!(remote = %self.target, build = %key, reason = %message, "Publishing interrupted");

        let record = StatusRecord::interrupted(self.target.clone(), message)
            .with_error(error.recorded());
        self.queue.remove(key, record);
    }
}

/// Identifier sent with an archive so the receiver can map time-based ids.
fn build_id(build: &BuildRef) -> String {
    read_metadata(&build.root_dir)
        .ok()
        .and_then(|m| m.id)
        .unwrap_or_else(|| build.number().0.to_string())
}

fn wall_clock_deadline(window: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(window)
        .ok()
        .and_then(|d| Utc::now().checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
