//! Per-target publishing workers.
//!
//! Each remote target gets exactly one worker task, so at most one transfer per
//! target is in flight while different targets publish concurrently.
//!
//! # Module Structure
//!
//! - [`state`]: the published [`WorkerState`] snapshot and the control handles
//!   (retry-now, abort) shared with the target
//! - [`worker`]: the publish loop and error classification
//! - [`supervisor`]: spawns a worker and marks it dead on failure or panic
//! - [`post_action`]: callbacks run after successful publishes

pub mod post_action;
pub mod state;
pub mod supervisor;
#[allow(clippy::module_inception)]
pub mod worker;


pub use post_action::{AuditLog, PostAction, PostActionFuture, PostActions};
pub use state::{WorkerControl, WorkerState};
pub use supervisor::WorkerHandle;
pub use worker::{
    DEFAULT_RECOVERY_WINDOW, DEFAULT_REQUEST_TIMEOUT, ErrorClass, PublishError, PublishingWorker,
    WorkerContext, WorkerError, WorkerOptions,
};
