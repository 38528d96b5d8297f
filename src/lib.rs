//! RustParrot - turns RSS/Atom feeds into followable ActivityPub actors
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      API Layer (Axum)                        │
//! │  - WebFinger                                                │
//! │  - ActivityPub actors, collections and inboxes              │
//! │  - Feed admin endpoint                                      │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │              Federation / Service Layer                      │
//! │  - Signature checks and inbox dispatch                      │
//! │  - Feed ingestion and the re-check scheduler                │
//! │  - Replies and follower broadcasts                          │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Data Layer                              │
//! │  - SQLite (sqlx)                                            │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - `api`: HTTP handlers
//! - `service`: Feed ingestion, outbound notes, account views
//! - `federation`: ActivityPub wire format, signatures, inbox
//! - `data`: Persistence
//! - `config`: Configuration management
//! - `error`: Error types

pub mod api;
pub mod config;
pub mod data;
pub mod error;
pub mod federation;
pub mod metrics;
pub mod service;

use std::sync::Arc;
use std::time::Duration;

use data::Repository;
use federation::{
    ActivitySender, ActorFetcher, CachingActorFetcher, HttpActivitySender, HttpActorFetcher,
    IdBuilder, InboxProcessor, KeyStore, SignatureChecker,
};
use service::clock::SystemClock;
use service::{
    BuiltinTexts, Directory, DomainBlockList, FeedIngestor, HttpPageFetcher, Messenger, Texts,
};

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<config::AppConfig>,

    /// Persistence
    pub repo: Arc<dyn Repository>,

    /// URL minting for local objects
    pub ids: IdBuilder,

    /// Account views and the follow handshake
    pub directory: Arc<Directory>,

    /// Feed resolution and the re-check scheduler
    pub ingestor: Arc<FeedIngestor>,

    /// Dispatch of verified inbound activities
    pub inbox: InboxProcessor,

    /// Inbound HTTP signature verification
    pub signatures: Arc<SignatureChecker>,
}

impl AppState {
    /// Initialize application state
    ///
    /// # Steps
    /// 1. Connect to SQLite database
    /// 2. Build the HTTP client
    /// 3. Wire federation and feed services
    /// 4. Make sure the operator account exists
    ///
    /// # Errors
    /// Returns error if any initialization step fails
    pub async fn new(config: config::AppConfig) -> Result<Self, error::AppError> {
        Self::with_key_bits(config, federation::key_store::DEFAULT_KEY_BITS).await
    }

    /// Like `new`, generating account keys of the given size
    pub async fn with_key_bits(
        config: config::AppConfig,
        key_bits: usize,
    ) -> Result<Self, error::AppError> {
        tracing::info!("Initializing application state...");

        // 1. Connect to SQLite database
        let db = data::Database::connect(&config.database.path).await?;
        let repo: Arc<dyn Repository> = Arc::new(db);
        tracing::info!("Database connected");

        // 2. Initialize HTTP client
        let timeout = Duration::from_secs(config.http.timeout_seconds);
        let http_client = reqwest::Client::builder()
            .user_agent(config.http.user_agent.clone())
            .timeout(timeout)
            .redirect(federation::url_guard::redirect_policy(
                config.http.allow_private_hosts,
            ))
            .build()
            .map_err(|e| error::AppError::Internal(e.into()))?;

        // 3. Wire services
        let ids = IdBuilder::new(&config.server.base_url());
        let keys = Arc::new(KeyStore::with_key_bits(repo.clone(), key_bits));
        let sender: Arc<dyn ActivitySender> =
            Arc::new(HttpActivitySender::new(http_client.clone(), ids.clone()));
        let texts: Arc<dyn Texts> = Arc::new(BuiltinTexts::default());

        let actors: Arc<dyn ActorFetcher> = Arc::new(CachingActorFetcher::new(
            Arc::new(HttpActorFetcher::new(
                http_client.clone(),
                config.http.allow_private_hosts,
            )),
            Duration::from_secs(config.http.actor_cache_ttl_seconds),
        ));
        let signatures = Arc::new(SignatureChecker::new(actors, Arc::new(SystemClock)));

        let directory = Arc::new(Directory::new(
            repo.clone(),
            keys.clone(),
            sender.clone(),
            ids.clone(),
            config.operator.clone(),
        ));
        let messenger = Arc::new(Messenger::new(
            repo.clone(),
            keys.clone(),
            sender,
            ids.clone(),
        ));
        let ingestor = Arc::new(
            FeedIngestor::new(
                repo.clone(),
                keys,
                messenger.clone(),
                texts.clone(),
                Arc::new(HttpPageFetcher::new(
                    http_client,
                    timeout,
                    config.http.allow_private_hosts,
                )),
                ids.clone(),
            )
            .with_schedule(config.schedule.clone())
            .with_feed_rules(
                Arc::new(DomainBlockList::new(&config.feeds.blocked_domains)),
                config.feeds.native_generators.clone(),
            ),
        );
        let inbox = InboxProcessor::new(
            repo.clone(),
            directory.clone(),
            ingestor.clone(),
            messenger,
            texts,
        );

        // 4. Operator account
        if directory.ensure_operator_account().await? {
            tracing::info!(handle = %config.operator.handle, "Operator account created");
        } else {
            tracing::info!(handle = %config.operator.handle, "Operator account exists");
        }

        tracing::info!("Application state initialized successfully");

        Ok(Self {
            config: Arc::new(config),
            repo,
            ids,
            directory,
            ingestor,
            inbox,
            signatures,
        })
    }
}

/// Build the Axum router with all routes.
///
/// This is shared by the binary and integration tests to keep route
/// composition consistent across environments.
pub fn build_router(state: AppState) -> axum::Router {
    use axum::Router;
    use tower_http::{
        compression::CompressionLayer, limit::RequestBodyLimitLayer, trace::TraceLayer,
    };

    const MAX_BODY_BYTES: usize = 1024 * 1024;

    Router::new()
        .route("/health", axum::routing::get(health_check))
        .merge(api::wellknown_router())
        .merge(api::activitypub_router())
        .nest("/api", api::feeds_router())
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
        .merge(api::metrics_router())
}

/// Start the feed re-check loop in the background
pub fn spawn_feed_checks(state: &AppState) {
    let ingestor = state.ingestor.clone();
    tokio::spawn(ingestor.run_scheduler());
    tracing::info!("Feed check task spawned");
}

async fn health_check() -> &'static str {
    "OK"
}
