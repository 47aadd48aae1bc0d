//! Publishing status of builds.
//!
//! Each build carries one [`StatusRecord`](crate::types::StatusRecord) per
//! target it was queued on, stored in the build's own metadata record:
//!
//! ```text
//! builds/12/build.json
//! {
//!   "number": 12,
//!   "publishing": {
//!     "public": {"state": "SUCCESS", "message": "...", ...},
//!     "mirror": {"state": "FAILURE_PENDING", "message": "...", "error": {...}}
//!   }
//! }
//! ```

pub mod format;
pub mod tracker;

pub use format::{OperatorAction, RenderedStatus, render_status};
pub use tracker::{StatusError, StatusTracker};
