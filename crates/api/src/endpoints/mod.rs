//! API endpoints.

mod campaigns;
mod events;
mod jobs;
mod tracking;

use axum::Router;

use crate::state::AppState;

/// Create the API router.
pub fn router() -> Router<AppState> {
    Router::new()
        .nest("/api/campaigns", campaigns::router())
        .nest("/api/queue", jobs::router())
        .nest("/api/events", events::router())
        .nest("/t", tracking::router())
}
