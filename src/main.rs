//! RustParrot binary entry point

use rustparrot::{AppState, config};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application entry point
///
/// # Setup
/// 1. Load configuration from file and environment
/// 2. Initialize tracing/logging from the logging section
/// 3. Initialize metrics
/// 4. Initialize AppState
/// 5. Start the feed check loop
/// 6. Start HTTP server
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Load configuration
    let config = config::AppConfig::load()?;

    // 2. Initialize tracing/logging; RUST_LOG overrides the configured level
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.logging.filter_directive().into());
    if config.logging.is_json() {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().pretty())
            .init();
    }

    tracing::info!("Starting RustParrot...");
    tracing::info!(
        domain = %config.server.domain,
        protocol = %config.server.protocol,
        operator = %config.operator.handle,
        "Configuration loaded"
    );
    if !config.server.protocol.eq_ignore_ascii_case("https") {
        tracing::warn!(
            domain = %config.server.domain,
            "Serving plain http; remote servers will refuse to federate with this instance"
        );
    }

    // 3. Initialize metrics
    rustparrot::metrics::init_metrics();

    // 4. Initialize application state
    let state = AppState::new(config.clone()).await?;

    // 5. Start background tasks
    rustparrot::spawn_feed_checks(&state);

    // 6. Start HTTP server
    let app = rustparrot::build_router(state);
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on {}", addr);
    tracing::info!("Public URL: {}", config.server.base_url());

    axum::serve(listener, app).await?;

    Ok(())
}
