//! Campaign delivery endpoints.

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use fanwave_common::AppResult;
use fanwave_db::entities::campaign;
use serde::Serialize;

use crate::extractors::AdminAuth;
use crate::response::ApiResponse;
use crate::state::AppState;

/// Acknowledgement for an accepted send or recovery.
#[derive(Debug, Serialize)]
pub struct QueuedResponse {
    /// Campaign that was queued.
    pub campaign_id: String,
    /// First batch job enqueued for it.
    pub job_id: String,
}

/// Queue a campaign for delivery.
async fn send_campaign(
    _auth: AdminAuth,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<ApiResponse<QueuedResponse>> {
    let job = state.orchestrator.queue_campaign(&id).await?;
    Ok(ApiResponse::ok(QueuedResponse {
        campaign_id: id,
        job_id: job.id,
    }))
}

/// Re-queue a sending campaign whose jobs were lost.
async fn recover_campaign(
    _auth: AdminAuth,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<ApiResponse<QueuedResponse>> {
    let job = state.orchestrator.recover_campaign(&id).await?;
    Ok(ApiResponse::ok(QueuedResponse {
        campaign_id: id,
        job_id: job.id,
    }))
}

/// Fetch a campaign with its delivery stats.
async fn get_campaign(
    _auth: AdminAuth,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<campaign::Model>> {
    let campaign = state.campaigns.get(&id).await?;
    Ok(Json(campaign))
}

/// Campaign routes.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{id}", get(get_campaign))
        .route("/{id}/send", post(send_campaign))
        .route("/{id}/recover", post(recover_campaign))
}
