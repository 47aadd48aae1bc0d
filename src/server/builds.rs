//! Build-level endpoints: the completion hook and per-build operator actions.

use axum::Json;
use axum::extract::{Path, Query, State};
use serde::{Deserialize, Serialize};

use super::AppState;
use super::error::ApiError;
use super::targets::lookup;
use crate::status::RenderedStatus;
use crate::target::{PublishAgain, TriggerOutcome};
use crate::types::{BuildKey, BuildRef};

/// Identifies a build in request bodies and query strings.
#[derive(Debug, Clone, Deserialize)]
pub struct BuildQuery {
    pub project: String,
    pub number: u64,
}

impl BuildQuery {
    fn key(&self) -> BuildKey {
        BuildKey::new(self.project.as_str(), self.number)
    }
}

#[derive(Debug, Serialize)]
pub struct RemoveResponse {
    pub removed: bool,
}

fn resolve(state: &AppState, query: &BuildQuery) -> Result<BuildRef, ApiError> {
    let key = query.key();
    state
        .registry()
        .context()
        .store
        .resolve(&key)?
        .ok_or(ApiError::BuildNotFound(key))
}

/// `POST /api/v1/builds/completed`
///
/// Called by the build server when a build finishes.
pub async fn build_completed(
    State(state): State<AppState>,
    Json(query): Json<BuildQuery>,
) -> Result<Json<TriggerOutcome>, ApiError> {
    Ok(Json(state.registry().on_build_completed(&query.key())?))
}

/// `GET /api/v1/targets/{target}/builds/status?project=&number=`
pub async fn build_status(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<BuildQuery>,
) -> Result<Json<RenderedStatus>, ApiError> {
    let target = lookup(&state, &name)?;
    let build = resolve(&state, &query)?;
    target
        .build_status(&build)?
        .map(Json)
        .ok_or_else(|| ApiError::NoStatus {
            build: build.key,
            target: target.name().clone(),
        })
}

/// `POST /api/v1/targets/{target}/builds/publish-again`
pub async fn publish_again(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(query): Json<BuildQuery>,
) -> Result<Json<PublishAgain>, ApiError> {
    let target = lookup(&state, &name)?;
    let build = resolve(&state, &query)?;
    Ok(Json(target.publish_again(build)?))
}

/// `POST /api/v1/targets/{target}/builds/remove`
pub async fn remove_from_queue(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(query): Json<BuildQuery>,
) -> Result<Json<RemoveResponse>, ApiError> {
    let target = lookup(&state, &name)?;
    let removed = target.remove_from_queue(&query.key());
    Ok(Json(RemoveResponse { removed }))
}
