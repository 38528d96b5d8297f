//! Prometheus scrape endpoint

use axum::{
    Router,
    http::header,
    response::{IntoResponse, Response},
    routing::get,
};
use prometheus::{Encoder, TextEncoder};

use crate::error::AppError;
use crate::metrics::REGISTRY;

/// GET /metrics
///
/// Every instrument in the crate registry, in text exposition format.
async fn metrics_handler() -> Result<Response, AppError> {
    let encoder = TextEncoder::new();
    let text = encoder
        .encode_to_string(&REGISTRY.gather())
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to encode metrics: {e}")))?;

    Ok(([(header::CONTENT_TYPE, encoder.format_type().to_string())], text).into_response())
}

/// Create metrics router
///
/// Merged outside the state-carrying router so scrapes skip the body
/// limit and tracing layers.
pub fn metrics_router<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new().route("/metrics", get(metrics_handler))
}
