//! Build Publisher - publishes completed builds from a local build server to
//! remote public servers.
//!
//! Each configured remote target owns a durable request queue drained by a
//! single worker. A publish synchronizes the remote project definition, sends
//! the build as a tar archive, checks the receipt and queues child builds.
//! Failures keep the build queued and put the worker into a timed recovery wait.

pub mod archive;
pub mod builds;
pub mod config;
pub mod persistence;
pub mod server;
pub mod status;
pub mod sync;
pub mod target;
pub mod transfer;
pub mod types;
pub mod worker;

#[cfg(test)]
pub mod test_utils;
