//! Remote targets.
//!
//! - [`queue`]: the durable request queue of one target
//! - [`RemoteTarget`]: queue, worker and operator actions of one target
//! - [`registry`]: the configured set of targets and the publish trigger

pub mod queue;
pub mod registry;
#[allow(clippy::module_inception)]
mod target;

pub use queue::RequestQueue;
pub use registry::{RegistryError, SkipReason, TargetRegistry, TriggerOutcome};
pub use target::{PublishAgain, RemoteTarget, TargetSettings, TargetView};
