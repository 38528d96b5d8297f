//! Well-known endpoints
//!
//! - /.well-known/webfinger

use axum::{
    Json, Router,
    extract::{Query, State},
    http::header,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Deserialize;

use crate::AppState;
use crate::error::AppError;
use crate::federation::parse_acct_resource;

/// Create well-known router
///
/// Routes:
/// - GET /.well-known/webfinger
pub fn wellknown_router() -> Router<AppState> {
    Router::new().route("/.well-known/webfinger", get(webfinger))
}

/// WebFinger query parameters
#[derive(Debug, Deserialize)]
struct WebFingerQuery {
    resource: String,
}

/// GET /.well-known/webfinger
///
/// Responds to WebFinger queries for local accounts.
///
/// Query: ?resource=acct:handle@domain
async fn webfinger(
    State(state): State<AppState>,
    Query(query): Query<WebFingerQuery>,
) -> Result<Response, AppError> {
    let (handle, host) = parse_acct_resource(&query.resource)?;

    if !host.eq_ignore_ascii_case(state.ids.host()) {
        return Err(AppError::NotFound);
    }

    let response = state
        .directory
        .get_webfinger(&handle)
        .await?
        .ok_or(AppError::NotFound)?;

    Ok((
        [(header::CONTENT_TYPE, "application/jrd+json; charset=utf-8")],
        Json(response),
    )
        .into_response())
}
