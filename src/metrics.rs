//! Prometheus metrics registry and instruments.
//!
//! This module is framework-agnostic and can be used from any layer.

use lazy_static::lazy_static;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry};

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // Feed Metrics
    pub static ref FEEDS_REQUESTED: IntCounter = IntCounter::new(
        "rustparrot_feeds_requested_total",
        "Total number of feed follow requests"
    ).expect("metric can be created");
    pub static ref FEEDS_ADDED: IntCounter = IntCounter::new(
        "rustparrot_feeds_added_total",
        "Total number of feeds turned into new accounts"
    ).expect("metric can be created");
    pub static ref FEED_CHECKS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("rustparrot_feed_checks_total", "Total number of scheduled feed re-checks"),
        &["outcome"]
    ).expect("metric can be created");
    pub static ref POSTS_SAVED: IntCounter = IntCounter::new(
        "rustparrot_posts_saved_total",
        "Total number of new feed posts stored"
    ).expect("metric can be created");
    pub static ref FEEDS_DUE: IntGauge = IntGauge::new(
        "rustparrot_feeds_due",
        "Number of feeds due for a check at the last scheduler pass"
    ).expect("metric can be created");
    pub static ref FEED_FETCH_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "rustparrot_feed_fetch_duration_seconds",
            "Feed and page fetch duration in seconds"
        ).buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        &["kind"]
    ).expect("metric can be created");

    // Federation Metrics
    pub static ref ACTIVITYPUB_ACTIVITIES_RECEIVED: IntCounterVec = IntCounterVec::new(
        Opts::new("rustparrot_activitypub_activities_received_total", "Total number of ActivityPub activities received"),
        &["activity_type"]
    ).expect("metric can be created");
    pub static ref ACTIVITYPUB_ACTIVITIES_SENT: IntCounterVec = IntCounterVec::new(
        Opts::new("rustparrot_activitypub_activities_sent_total", "Total number of ActivityPub activities sent"),
        &["activity_type", "status"]
    ).expect("metric can be created");
    pub static ref SIGNATURE_PROBLEMS_TOTAL: IntCounter = IntCounter::new(
        "rustparrot_signature_problems_total",
        "Total number of inbound requests with unverifiable signatures"
    ).expect("metric can be created");

    // Error Metrics
    pub static ref ERRORS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("rustparrot_errors_total", "Total number of errors"),
        &["error_type"]
    ).expect("metric can be created");
}

/// Register all metrics with the global registry
///
/// Call once at startup.
pub fn init_metrics() {
    REGISTRY
        .register(Box::new(FEEDS_REQUESTED.clone()))
        .expect("FEEDS_REQUESTED can be registered");
    REGISTRY
        .register(Box::new(FEEDS_ADDED.clone()))
        .expect("FEEDS_ADDED can be registered");
    REGISTRY
        .register(Box::new(FEED_CHECKS_TOTAL.clone()))
        .expect("FEED_CHECKS_TOTAL can be registered");
    REGISTRY
        .register(Box::new(POSTS_SAVED.clone()))
        .expect("POSTS_SAVED can be registered");
    REGISTRY
        .register(Box::new(FEEDS_DUE.clone()))
        .expect("FEEDS_DUE can be registered");
    REGISTRY
        .register(Box::new(FEED_FETCH_DURATION_SECONDS.clone()))
        .expect("FEED_FETCH_DURATION_SECONDS can be registered");
    REGISTRY
        .register(Box::new(ACTIVITYPUB_ACTIVITIES_RECEIVED.clone()))
        .expect("ACTIVITYPUB_ACTIVITIES_RECEIVED can be registered");
    REGISTRY
        .register(Box::new(ACTIVITYPUB_ACTIVITIES_SENT.clone()))
        .expect("ACTIVITYPUB_ACTIVITIES_SENT can be registered");
    REGISTRY
        .register(Box::new(SIGNATURE_PROBLEMS_TOTAL.clone()))
        .expect("SIGNATURE_PROBLEMS_TOTAL can be registered");
    REGISTRY
        .register(Box::new(ERRORS_TOTAL.clone()))
        .expect("ERRORS_TOTAL can be registered");

    tracing::info!("Metrics initialized");
}
