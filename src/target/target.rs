use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tokio::sync::watch;
use tracing::info;

use super::queue::RequestQueue;
use crate::status::{RenderedStatus, StatusError};
use crate::transfer::{RemoteEndpoint, TransferClient};
use crate::types::{BuildKey, BuildRef, StatusRecord, TargetName};
use crate::worker::{PublishingWorker, WorkerContext, WorkerControl, WorkerHandle, WorkerState};

/// Configured settings of one remote target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetSettings {
    pub name: TargetName,
    pub endpoint: RemoteEndpoint,
}

/// Outcome of an operator publish-again request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishAgain {
    Requeued(StatusRecord),
    AlreadyQueued,
}

/// Monitoring view of a target.
#[derive(Debug, Clone, Serialize)]
pub struct TargetView {
    pub name: TargetName,
    pub url: String,
    pub worker: WorkerState,
    pub worker_alive: bool,
    pub queue: Vec<BuildKey>,
}

/// One remote server: its queue and the worker draining it.
pub struct RemoteTarget {
    settings: TargetSettings,
    queue: Arc<RequestQueue>,
    control: Arc<WorkerControl>,
    ctx: WorkerContext,
    worker: Mutex<Option<WorkerHandle>>,
}

impl RemoteTarget {
    /// Loads the target's persisted queue and starts its worker.
    ///
    /// Must be called within a tokio runtime.
    pub fn start(settings: TargetSettings, ctx: WorkerContext) -> Arc<Self> {
        let queue = Arc::new(RequestQueue::load(
            settings.name.clone(),
            &ctx.state_dir,
            ctx.store.as_ref(),
            ctx.tracker.clone(),
        ));
        info!(remote = %settings.name, queued = queue.len(), "Remote target loaded");

        let target = Arc::new(RemoteTarget {
            settings,
            queue,
            control: Arc::new(WorkerControl::new()),
            ctx,
            worker: Mutex::new(None),
        });
        *target.lock_worker() = Some(target.new_handle());
        target
    }

    pub fn name(&self) -> &TargetName {
        &self.settings.name
    }

    pub fn settings(&self) -> &TargetSettings {
        &self.settings
    }

    pub fn queue(&self) -> &RequestQueue {
        &self.queue
    }

    /// Queues a freshly completed build with status PENDING.
    pub fn publish_new_build(&self, build: BuildRef) -> bool {
        self.queue
            .enqueue(build, StatusRecord::pending(self.name().clone()))
    }

    /// Queues a build again after it reached a terminal state.
    ///
    /// A build that failed resumes as FAILURE_PENDING, anything else as
    /// PENDING. Builds still queued are left alone.
    pub fn publish_again(&self, build: BuildRef) -> Result<PublishAgain, StatusError> {
        let key = build.key.clone();
        let requeued = self.queue.enqueue_if_absent(build, |build| {
            Ok::<_, StatusError>(match self.ctx.tracker.get(build, self.name())? {
                Some(previous) => previous.republished(),
                None => StatusRecord::pending(self.name().clone()),
            })
        })?;
        match requeued {
            Some(record) => {
                info!(remote = %self.name(), build = %key, status = %record.state, "Publishing build again");
                Ok(PublishAgain::Requeued(record))
            }
            None => Ok(PublishAgain::AlreadyQueued),
        }
    }

    /// Removes a build from the queue with status INTERRUPTED.
    pub fn remove_from_queue(&self, key: &BuildKey) -> bool {
        let record = StatusRecord::interrupted(self.name().clone(), "Removed from queue by operator");
        let removed = self.queue.remove(key, record).is_some();
        if removed {
            info!(remote = %self.name(), build = %key, "Build removed from queue");
        }
        removed
    }

    /// Ends the worker's error-recovery wait early.
    pub fn retry_now(&self) {
        info!(remote = %self.name(), "Retry requested by operator");
        self.control.retry_now();
    }

    /// Aborts the in-flight transfer, returning the affected build.
    pub fn abort(&self) -> Option<BuildKey> {
        let build = self.control.abort();
        if let Some(build) = &build {
            info!(remote = %self.name(), build = %build, "Transfer abort requested");
        }
        build
    }

    /// Starts a new worker if none is alive. Returns true if one was started.
    pub fn resurrect(&self) -> bool {
        let mut slot = self.lock_worker();
        if slot.as_ref().is_some_and(WorkerHandle::is_alive) {
            return false;
        }
        info!(remote = %self.name(), "Resurrecting publishing worker");
        *slot = Some(self.new_handle());
        true
    }

    pub fn state(&self) -> WorkerState {
        self.control.state()
    }

    pub fn subscribe(&self) -> watch::Receiver<WorkerState> {
        self.control.subscribe()
    }

    pub fn is_worker_alive(&self) -> bool {
        self.lock_worker()
            .as_ref()
            .is_some_and(WorkerHandle::is_alive)
    }

    /// Renders the status record this target attached to `build`.
    pub fn build_status(&self, build: &BuildRef) -> Result<Option<RenderedStatus>, StatusError> {
        Ok(self
            .ctx
            .tracker
            .get(build, self.name())?
            .map(RenderedStatus::new))
    }

    pub fn view(&self) -> TargetView {
        TargetView {
            name: self.name().clone(),
            url: self.settings.endpoint.url.to_string(),
            worker: self.state(),
            worker_alive: self.is_worker_alive(),
            queue: self.queue.snapshot(),
        }
    }

    /// Stops the worker and waits for it to exit.
    pub async fn shutdown(&self) {
        let handle = self.lock_worker().take();
        if let Some(handle) = handle {
            handle.shutdown().await;
        }
    }

    fn new_handle(&self) -> WorkerHandle {
        let client = TransferClient::new(
            self.settings.endpoint.clone(),
            self.ctx.options.request_timeout,
        );
        let worker = PublishingWorker::new(
            self.name().clone(),
            client,
            self.queue.clone(),
            self.control.clone(),
            self.ctx.clone(),
        );
        WorkerHandle::spawn(self.name().clone(), worker, self.control.clone())
    }

    fn lock_worker(&self) -> std::sync::MutexGuard<'_, Option<WorkerHandle>> {
        self.worker.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for RemoteTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteTarget")
            .field("settings", &self.settings)
            .field("queued", &self.queue.len())
            .finish_non_exhaustive()
    }
}
