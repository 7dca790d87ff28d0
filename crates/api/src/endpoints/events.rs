//! Provider event webhook.
//!
//! The provider posts an array of delivery events, each echoing back the
//! `message_id` we attached at send time. Delivery is at-least-once, so the
//! recorder absorbs duplicates; we answer 204 for every recognized payload
//! shape so the provider never retries forever over events we chose to
//! ignore.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use fanwave_common::AppResult;
use serde::Deserialize;
use tracing::debug;

use crate::response::ok;
use crate::state::AppState;

/// One provider delivery event.
#[derive(Debug, Deserialize)]
pub struct MailEvent {
    /// Event kind as named by the provider.
    pub event: String,
    /// Correlation token attached at send time.
    pub message_id: Option<String>,
    /// Provider-supplied detail (bounce reason and the like).
    pub reason: Option<String>,
}

/// Ingest a batch of provider events.
async fn ingest_events(
    State(state): State<AppState>,
    Json(events): Json<Vec<MailEvent>>,
) -> AppResult<impl IntoResponse> {
    for event in events {
        let Some(message_id) = event.message_id.as_deref() else {
            debug!(event = %event.event, "Provider event without message_id, ignoring");
            continue;
        };

        match event.event.as_str() {
            "open" => state.recorder.record_open(message_id).await?,
            "click" => state.recorder.record_click(message_id).await?,
            "bounce" | "dropped" => {
                state
                    .recorder
                    .record_bounce(message_id, event.reason.as_deref())
                    .await?;
            }
            "spamreport" => state.recorder.record_complaint(message_id).await?,
            // Send-time recording already covers delivery confirmations.
            "delivered" => {}
            other => {
                debug!(event = %other, message_id = %message_id, "Unhandled provider event");
            }
        }
    }
    Ok(ok())
}

/// Event webhook routes.
pub fn router() -> Router<AppState> {
    Router::new().route("/mail", post(ingest_events))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_event_payload_shape() {
        let body = r#"[
            {"event": "open", "message_id": "abc123"},
            {"event": "bounce", "message_id": "def456", "reason": "550 user unknown"},
            {"event": "processed", "sg_event_id": "zzz"}
        ]"#;

        let events: Vec<MailEvent> = serde_json::from_str(body).unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].event, "open");
        assert_eq!(events[1].reason.as_deref(), Some("550 user unknown"));
        assert!(events[2].message_id.is_none());
    }
}
