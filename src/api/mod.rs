//! API layer
//!
//! HTTP handlers for:
//! - WebFinger
//! - ActivityPub (for federation)
//! - Feed admin API
//! - Metrics (Prometheus)

mod activitypub;
mod feeds;
pub mod metrics;
mod wellknown;

pub use activitypub::activitypub_router;
pub use feeds::{AddFeedResponse, feeds_router};
pub use metrics::metrics_router;
pub use wellknown::wellknown_router;
