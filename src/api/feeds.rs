//! Feed admin API
//!
//! Lets the operator bridge a feed without going through a mention.

use axum::{
    Json, Router, async_trait,
    extract::{FromRef, FromRequestParts, State},
    http::request::Parts,
    routing::post,
};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

use crate::AppState;
use crate::error::AppError;

/// Create feed admin router
///
/// Routes:
/// - POST /api/feeds - Resolve and follow a feed
pub fn feeds_router() -> Router<AppState> {
    Router::new().route("/feeds", post(add_feed))
}

/// Proof that the request carried the admin bearer token
#[derive(Debug, Clone, Copy)]
pub struct AdminToken;

#[async_trait]
impl<S> FromRequestParts<S> for AdminToken
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let state = AppState::from_ref(state);
        let token = parts
            .headers
            .get("Authorization")
            .and_then(|h| h.to_str().ok())
            .and_then(|h| h.strip_prefix("Bearer "))
            .ok_or(AppError::Unauthorized)?;

        let expected = state.config.admin.api_token.as_bytes();
        if expected.is_empty() || !bool::from(token.as_bytes().ct_eq(expected)) {
            return Err(AppError::Unauthorized);
        }

        Ok(AdminToken)
    }
}

#[derive(Debug, Deserialize)]
pub struct AddFeedRequest {
    pub url: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AddFeedResponse {
    pub handle: Option<String>,
    pub actor_url: Option<String>,
    pub status: String,
}

/// POST /api/feeds
///
/// Body: `{"url": "https://blog.example/"}`
async fn add_feed(
    State(state): State<AppState>,
    _admin: AdminToken,
    Json(request): Json<AddFeedRequest>,
) -> Result<Json<AddFeedResponse>, AppError> {
    tracing::info!(url = %request.url, "Feed requested through admin API");

    let (account, status) = state.ingestor.resolve_and_follow(&request.url).await?;

    Ok(Json(AddFeedResponse {
        handle: account.as_ref().map(|a| a.handle.clone()),
        actor_url: account.map(|a| a.user_url),
        status: status.as_str().to_string(),
    }))
}
