//! Persistence layer for the build publisher.
//!
//! # File Layout
//!
//! ```text
//! <state_dir>/
//!   queues/
//!     <target>.json     # ordered (project, build number) pairs per target
//! ```
//!
//! Publishing status records are not stored here; they live in each build's
//! own metadata record (see [`crate::status`]).
//!
//! # Crash Safety
//!
//! All files are written with write-to-temp-then-rename plus file and
//! directory fsync, so a crash leaves either the old or the new contents.

pub mod fsync;
pub mod queue_file;

pub use fsync::{fsync_dir, fsync_file, write_atomic};
pub use queue_file::{
    PersistedQueue, QueueFileError, SCHEMA_VERSION, load_queue, queue_path, save_queue,
};
