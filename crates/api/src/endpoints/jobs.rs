//! Queue inspection and control endpoints.

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use fanwave_common::AppResult;
use fanwave_queue::{DispatchSummary, Job, JobCounts, JobState};
use serde::Deserialize;

use crate::extractors::AdminAuth;
use crate::response::{ApiResponse, ok};
use crate::state::AppState;

const DEFAULT_LIST_LIMIT: usize = 50;

/// Query for job listing.
#[derive(Debug, Deserialize)]
pub struct ListJobsQuery {
    /// Queue state to list.
    pub state: String,
    /// Maximum jobs to return.
    pub limit: Option<usize>,
}

/// Query for the external-trigger tick.
#[derive(Debug, Deserialize)]
pub struct TickQuery {
    /// Override on jobs processed this tick.
    pub max_jobs: Option<usize>,
}

/// List jobs in one state.
async fn list_jobs(
    _auth: AdminAuth,
    State(state): State<AppState>,
    Query(query): Query<ListJobsQuery>,
) -> AppResult<ApiResponse<Vec<Job>>> {
    let job_state = JobState::parse(&query.state)?;
    let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT);
    let jobs = state.store.list(job_state, limit).await?;
    Ok(ApiResponse::ok(jobs))
}

/// Per-state job counts.
async fn counts(
    _auth: AdminAuth,
    State(state): State<AppState>,
) -> AppResult<ApiResponse<JobCounts>> {
    Ok(ApiResponse::ok(state.store.counts().await?))
}

/// Re-queue a completed or failed job.
async fn retry_job(
    _auth: AdminAuth,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<ApiResponse<Job>> {
    Ok(ApiResponse::ok(state.store.retry(&id).await?))
}

/// Delete a job outright.
async fn remove_job(
    _auth: AdminAuth,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    state.store.remove(&id).await?;
    Ok(ok())
}

/// Stop handing out claims.
async fn pause(_auth: AdminAuth, State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    state.store.pause().await?;
    Ok(ok())
}

/// Resume handing out claims.
async fn resume(_auth: AdminAuth, State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    state.store.resume().await?;
    Ok(ok())
}

/// External-trigger delivery tick.
///
/// Equivalent to one scheduler tick; bounded and idempotent, so cron-style
/// deployments can drive delivery with nothing but this route.
async fn tick(
    _auth: AdminAuth,
    State(state): State<AppState>,
    Query(query): Query<TickQuery>,
) -> AppResult<Json<DispatchSummary>> {
    let max_jobs = query
        .max_jobs
        .unwrap_or(state.max_jobs_per_tick)
        .clamp(1, state.max_jobs_per_tick.max(1));
    let summary = state.dispatcher.process_next(max_jobs).await?;
    Ok(Json(summary))
}

/// Queue routes.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/jobs", get(list_jobs))
        .route("/counts", get(counts))
        .route("/jobs/{id}/retry", post(retry_job))
        .route("/jobs/{id}", delete(remove_job))
        .route("/pause", post(pause))
        .route("/resume", post(resume))
        .route("/tick", post(tick))
}
