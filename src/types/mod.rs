//! Core domain types for the build publisher.
//!
//! This module contains the fundamental types shared by the queue, the worker,
//! and the transfer layers.

pub mod build;
pub mod exchange;
pub mod ids;
pub mod status;

// Re-export commonly used types at the module level
pub use build::{BuildRef, BuildResult, ProjectKind, ProjectRef};
pub use exchange::FailedExchange;
pub use ids::{BuildKey, BuildNumber, InvalidTargetName, ProjectName, TargetName};
pub use status::{PublishState, RecordedError, StatusRecord};
