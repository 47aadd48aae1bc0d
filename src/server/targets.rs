//! Target monitoring and worker control endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use serde::Serialize;

use super::AppState;
use super::error::ApiError;
use crate::target::{RemoteTarget, TargetView};
use crate::types::{BuildKey, TargetName};

#[derive(Debug, Serialize)]
pub struct ResurrectResponse {
    pub started: bool,
}

#[derive(Debug, Serialize)]
pub struct AbortResponse {
    /// The build whose transfer was aborted, if one was in flight.
    pub aborted: Option<BuildKey>,
}

/// Looks up a target by the name in the request path.
pub(super) fn lookup(state: &AppState, name: &str) -> Result<Arc<RemoteTarget>, ApiError> {
    TargetName::parse(name)
        .ok()
        .and_then(|n| state.registry().get(&n))
        .ok_or_else(|| ApiError::UnknownTarget(name.to_string()))
}

/// `GET /api/v1/targets`
pub async fn list_targets(State(state): State<AppState>) -> Json<Vec<TargetView>> {
    Json(state.registry().targets().iter().map(|t| t.view()).collect())
}

/// `GET /api/v1/targets/{target}`
///
/// Returns the worker state snapshot and the queued builds.
pub async fn get_target(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<TargetView>, ApiError> {
    Ok(Json(lookup(&state, &name)?.view()))
}

/// `POST /api/v1/targets/{target}/retry`
pub async fn retry_now(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<StatusCode, ApiError> {
    lookup(&state, &name)?.retry_now();
    Ok(StatusCode::ACCEPTED)
}

/// `POST /api/v1/targets/{target}/resurrect`
pub async fn resurrect(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ResurrectResponse>, ApiError> {
    let started = lookup(&state, &name)?.resurrect();
    Ok(Json(ResurrectResponse { started }))
}

/// `POST /api/v1/targets/{target}/abort`
pub async fn abort(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<AbortResponse>, ApiError> {
    let aborted = lookup(&state, &name)?.abort();
    Ok(Json(AbortResponse { aborted }))
}
