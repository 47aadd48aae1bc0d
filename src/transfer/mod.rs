//! HTTP transfer to remote targets.
//!
//! - [`client`]: session handling, form login, redirects, abort
//! - [`endpoints`]: URL layout of the remote protocol
//! - [`error`]: failure taxonomy with captured server exchanges

pub mod client;
pub mod endpoints;
pub mod error;

pub use client::{
    Credentials, MAX_REDIRECTS, RemoteEndpoint, RemoteResponse, RequestBody, TransferClient,
    TransferRequest,
};
pub use error::{Result, TransferError};

/// Response header confirming which project a build was received for.
pub const RECEIPT_HEADER: &str = "X-Build-Received";

/// Request header carrying the build's time-based identifier.
pub const BUILD_ID_HEADER: &str = "X-Build-Id";

/// Request header carrying the sender's timezone.
pub const TIMEZONE_HEADER: &str = "X-Origin-Timezone";
