use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header;
use axum::http::request::Parts;

use crate::auth;
use crate::policy::Actor;

use super::error::ApiError;
use super::types::AppState;

/// Extracts the verified actor from the bearer token. Every handler that
/// takes an `Actor` argument is behind authentication; there is no ambient
/// session state.
#[async_trait]
impl FromRequestParts<AppState> for Actor {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, ApiError> {
        let header = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ApiError::unauthenticated("Authentication required"))?;
        let token = header
            .strip_prefix("Bearer ")
            .ok_or_else(|| ApiError::unauthenticated("Malformed authorization header"))?;
        let conn = state.conn()?;
        auth::actor_for_token(&conn, token)?
            .ok_or_else(|| ApiError::unauthenticated("Invalid session"))
    }
}
