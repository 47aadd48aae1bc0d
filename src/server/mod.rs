//! HTTP server for the build publisher.
//!
//! Receives build-completion notifications from the local build server and
//! exposes the operator surface: target monitoring, worker control and
//! per-build publish actions.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns 200 if server is running
//! - `GET /api/v1/targets` - All targets with worker state and queue
//! - `GET /api/v1/targets/{target}` - One target
//! - `POST /api/v1/targets/{target}/retry` - End the error-recovery wait
//! - `POST /api/v1/targets/{target}/resurrect` - Restart a dead worker
//! - `POST /api/v1/targets/{target}/abort` - Abort the in-flight transfer
//! - `POST /api/v1/builds/completed` - Build-completion hook
//! - `GET /api/v1/targets/{target}/builds/status` - Rendered publish status
//! - `POST /api/v1/targets/{target}/builds/publish-again` - Queue a build again
//! - `POST /api/v1/targets/{target}/builds/remove` - Remove a build from the queue

use std::sync::Arc;

use crate::target::TargetRegistry;

pub mod builds;
pub mod error;
pub mod health;
pub mod targets;

pub use error::ApiError;
pub use health::health_handler;

/// Shared application state.
///
/// Passed to all handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    registry: Arc<TargetRegistry>,
}

impl AppState {
    pub fn new(registry: Arc<TargetRegistry>) -> Self {
        AppState {
            inner: Arc::new(AppStateInner { registry }),
        }
    }

    pub fn registry(&self) -> &TargetRegistry {
        &self.inner.registry
    }
}

/// Builds the axum Router with all endpoints.
pub fn build_router(app_state: AppState) -> axum::Router {
    use axum::routing::{get, post};

    axum::Router::new()
        .route("/health", get(health_handler))
        .route("/api/v1/targets", get(targets::list_targets))
        .route("/api/v1/targets/{target}", get(targets::get_target))
        .route("/api/v1/targets/{target}/retry", post(targets::retry_now))
        .route("/api/v1/targets/{target}/resurrect", post(targets::resurrect))
        .route("/api/v1/targets/{target}/abort", post(targets::abort))
        .route("/api/v1/builds/completed", post(builds::build_completed))
        .route(
            "/api/v1/targets/{target}/builds/status",
            get(builds::build_status),
        )
        .route(
            "/api/v1/targets/{target}/builds/publish-again",
            post(builds::publish_again),
        )
        .route(
            "/api/v1/targets/{target}/builds/remove",
            post(builds::remove_from_queue),
        )
        .with_state(app_state)
}
