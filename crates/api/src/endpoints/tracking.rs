//! Open and click tracking.
//!
//! These routes serve mail clients, so they must degrade gracefully: a
//! recording failure is logged, never surfaced. The pixel still renders
//! and the click still lands on the target URL.

use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::get;
use serde::Deserialize;
use tracing::warn;

use crate::state::AppState;

/// Smallest valid transparent GIF.
const TRACKING_PIXEL: &[u8] = &[
    0x47, 0x49, 0x46, 0x38, 0x39, 0x61, 0x01, 0x00, 0x01, 0x00, 0x80, 0x00, 0x00, 0x00, 0x00,
    0x00, 0xff, 0xff, 0xff, 0x21, 0xf9, 0x04, 0x01, 0x00, 0x00, 0x00, 0x00, 0x2c, 0x00, 0x00,
    0x00, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00, 0x02, 0x02, 0x44, 0x01, 0x00, 0x3b,
];

/// Click target.
#[derive(Debug, Deserialize)]
pub struct ClickQuery {
    /// Destination URL.
    pub url: String,
}

/// Open-tracking pixel.
async fn track_open(State(state): State<AppState>, Path(message_id): Path<String>) -> Response {
    if let Err(e) = state.recorder.record_open(&message_id).await {
        warn!(message_id = %message_id, error = %e, "Failed to record open");
    }

    (
        [
            (header::CONTENT_TYPE, "image/gif"),
            (header::CACHE_CONTROL, "no-store, max-age=0"),
        ],
        TRACKING_PIXEL,
    )
        .into_response()
}

/// Click recording and redirect.
async fn track_click(
    State(state): State<AppState>,
    Path(message_id): Path<String>,
    Query(query): Query<ClickQuery>,
) -> Response {
    if query.url.is_empty() {
        return StatusCode::BAD_REQUEST.into_response();
    }

    if let Err(e) = state.recorder.record_click(&message_id).await {
        warn!(message_id = %message_id, error = %e, "Failed to record click");
    }

    Redirect::temporary(&query.url).into_response()
}

/// Tracking routes.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/open/{message_id}", get(track_open))
        .route("/click/{message_id}", get(track_click))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_is_a_gif89a() {
        assert_eq!(&TRACKING_PIXEL[..6], b"GIF89a");
        assert_eq!(*TRACKING_PIXEL.last().unwrap(), 0x3b);
    }
}
