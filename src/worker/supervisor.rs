use std::any::Any;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::error;

use super::state::{WorkerControl, WorkerState};
use super::worker::PublishingWorker;
use crate::types::{RecordedError, TargetName};

/// A running worker and the task watching it.
///
/// If the worker returns an error or panics, the watcher publishes
/// [`WorkerState::Dead`] and the worker stays down until resurrected.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    pub fn spawn(target: TargetName, worker: PublishingWorker, control: Arc<WorkerControl>) -> Self {
        let shutdown = CancellationToken::new();
        let worker_task = tokio::spawn(worker.run(shutdown.clone()));

        let task = tokio::spawn(async move {
            let cause = match worker_task.await {
                Ok(Ok(())) => return,
                Ok(Err(e)) => RecordedError::from_error(&e).message,
                Err(e) if e.is_panic() => {
                    format!("worker panicked: {}", panic_message(e.into_panic().as_ref()))
                }
                Err(e) => format!("worker task failed: {e}"),
            };

            error!(remote = %target, cause = %cause, "Publishing worker died");
            control.finish();
            control.set_state(WorkerState::Dead { cause });
        });

        WorkerHandle { shutdown, task }
    }

    pub fn is_alive(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stops the worker and waits for it to exit.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        let _ = self.task.await;
    }
}

pub(super) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}
