//! Worker state snapshots.
//!
//! A worker publishes a fresh [`WorkerState`] value on every transition.
//! Readers get a consistent copy without waiting on the worker.

use std::sync::Mutex;
use std::sync::PoisonError;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Notify, watch};
use tokio_util::sync::CancellationToken;

use crate::types::{BuildKey, FailedExchange};

/// What a publishing worker is doing right now.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum WorkerState {
    /// Waiting for the queue to become non-empty.
    Idle,

    /// Publishing `build`.
    Publishing {
        build: BuildKey,
        since: DateTime<Utc>,
    },

    /// Sleeping after a failure until `deadline` or a retry request.
    ErrorRecoveryWait {
        deadline: DateTime<Utc>,
        build: BuildKey,
        cause: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        failed_exchange: Option<FailedExchange>,
    },

    /// The worker hit an unrecoverable error and exited.
    Dead { cause: String },
}

impl WorkerState {
    pub fn is_dead(&self) -> bool {
        matches!(self, WorkerState::Dead { .. })
    }

    /// The build the worker is busy with, if any.
    pub fn build(&self) -> Option<&BuildKey> {
        match self {
            WorkerState::Publishing { build, .. } | WorkerState::ErrorRecoveryWait { build, .. } => {
                Some(build)
            }
            WorkerState::Idle | WorkerState::Dead { .. } => None,
        }
    }
}

/// Shared handles between a target and its current worker.
///
/// Outlives individual workers: a resurrected worker reuses the same control,
/// so state subscribers and retry requests keep working.
#[derive(Debug)]
pub struct WorkerControl {
    state: watch::Sender<WorkerState>,
    retry: Notify,
    in_flight: Mutex<Option<(BuildKey, CancellationToken)>>,
}

impl WorkerControl {
    pub fn new() -> Self {
        WorkerControl {
            state: watch::Sender::new(WorkerState::Idle),
            retry: Notify::new(),
            in_flight: Mutex::new(None),
        }
    }

    /// Returns a copy of the current state.
    pub fn state(&self) -> WorkerState {
        self.state.borrow().clone()
    }

    /// Subscribes to state transitions.
    pub fn subscribe(&self) -> watch::Receiver<WorkerState> {
        self.state.subscribe()
    }

    pub(crate) fn set_state(&self, state: WorkerState) {
        self.state.send_replace(state);
    }

    /// Wakes a worker sleeping in error recovery.
    ///
    /// Has no effect on a worker that is not waiting.
    pub fn retry_now(&self) {
        self.retry.notify_waiters();
    }

    pub(crate) fn retry_requested(&self) -> tokio::sync::futures::Notified<'_> {
        self.retry.notified()
    }

    /// Registers the token that aborts the transfer of `build`.
    pub(crate) fn begin(&self, build: BuildKey, token: CancellationToken) {
        *self.in_flight.lock().unwrap_or_else(PoisonError::into_inner) = Some((build, token));
    }

    pub(crate) fn finish(&self) {
        *self.in_flight.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Cancels the in-flight transfer, returning the affected build.
    pub fn abort(&self) -> Option<BuildKey> {
        let guard = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        guard.as_ref().map(|(build, token)| {
            token.cancel();
            build.clone()
        })
    }
}

impl Default for WorkerControl {
    fn default() -> Self {
        WorkerControl::new()
    }
}
