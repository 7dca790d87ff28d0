//! Request extractors.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use fanwave_common::AppError;

use crate::state::AppState;

/// Extractor that admits only requests carrying the admin bearer token.
pub struct AdminAuth;

impl FromRequestParts<AppState> for AdminAuth {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get("Authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));

        match token {
            Some(token) if token == state.admin_token.as_ref() => Ok(Self),
            _ => Err(AppError::Unauthorized),
        }
    }
}
