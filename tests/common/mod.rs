//! Common test utilities for E2E tests

#![allow(dead_code)]

pub mod schema_validator;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::{RsaPrivateKey, RsaPublicKey};
use rustparrot::federation::signature::sign_request;
use rustparrot::{AppState, config};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Once};
use tempfile::TempDir;
use tokio::net::TcpListener;

pub const ADMIN_TOKEN: &str = "test-admin-token-0123456789";
const TEST_KEY_BITS: usize = 1024;

static METRICS: Once = Once::new();

/// Test server instance
pub struct TestServer {
    pub addr: String,
    pub state: AppState,
    pub _temp_dir: TempDir,
    pub client: reqwest::Client,
}

impl TestServer {
    /// Create a new test server instance
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Create a test server after adjusting the default test configuration
    pub async fn with_config(adjust: impl FnOnce(&mut config::AppConfig)) -> Self {
        METRICS.call_once(rustparrot::metrics::init_metrics);

        // Create temporary directory for test database
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");

        let mut config = config::AppConfig {
            server: config::ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0,
                domain: "localhost".to_string(),
                protocol: "http".to_string(),
            },
            database: config::DatabaseConfig { path: db_path },
            operator: config::OperatorConfig {
                handle: "birb".to_string(),
                display_name: "Parrot".to_string(),
                bio: "<p>Mention me with a link</p>".to_string(),
                manually_approves_followers: false,
                profile_image_url: String::new(),
                header_image_url: String::new(),
            },
            schedule: config::ScheduleConfig::default(),
            http: config::HttpConfig {
                timeout_seconds: 10,
                user_agent: "RustParrot/test".to_string(),
                actor_cache_ttl_seconds: 60,
                allow_private_hosts: true,
            },
            admin: config::AdminConfig {
                api_token: ADMIN_TOKEN.to_string(),
            },
            feeds: config::FeedsConfig {
                blocked_domains: vec!["blocked.example".to_string()],
                native_generators: vec!["mastodon".to_string()],
            },
            logging: config::LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        };
        adjust(&mut config);

        // Initialize app state
        let state = AppState::with_key_bits(config, TEST_KEY_BITS)
            .await
            .unwrap();

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .unwrap();

        // Bind to random port
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let addr_str = format!("http://{}", addr);

        let app = rustparrot::build_router(state.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr: addr_str,
            state,
            _temp_dir: temp_dir,
            client,
        }
    }

    /// Get base URL for API requests
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.addr, path)
    }

    /// URL of a local actor as it appears in activities
    pub fn actor_url(&self, handle: &str) -> String {
        self.state.ids.user_url(handle)
    }

    /// POST an activity signed with the remote actor's key
    pub async fn post_signed(
        &self,
        path: &str,
        remote: &FakeRemote,
        activity: &Value,
    ) -> reqwest::Response {
        let url = self.url(path);
        let body = serde_json::to_vec(activity).unwrap();
        let signed = sign_request(
            &url,
            &body,
            &remote.private_key_pem,
            &remote.key_id(),
            chrono::Utc::now(),
        )
        .unwrap();

        self.client
            .post(&url)
            .header("Content-Type", "application/activity+json")
            .header("Date", signed.date)
            .header("Digest", signed.digest)
            .header("Signature", signed.signature)
            .body(body)
            .send()
            .await
            .unwrap()
    }

    /// POST /api/feeds with the admin token
    pub async fn add_feed(&self, url: &str) -> reqwest::Response {
        self.client
            .post(&self.url("/api/feeds"))
            .header("Authorization", format!("Bearer {ADMIN_TOKEN}"))
            .json(&serde_json::json!({ "url": url }))
            .send()
            .await
            .unwrap()
    }
}

#[derive(Default)]
struct RemoteState {
    actor: Value,
    received: Vec<Value>,
    pages: HashMap<String, (&'static str, String)>,
}

/// A remote server hosting the actor `alice`, her inbox and some web pages
pub struct FakeRemote {
    pub base: String,
    pub private_key_pem: String,
    state: Arc<Mutex<RemoteState>>,
}

impl FakeRemote {
    pub async fn start() -> Self {
        let private_key = RsaPrivateKey::new(&mut rand::thread_rng(), TEST_KEY_BITS).unwrap();
        let public_key_pem = RsaPublicKey::from(&private_key)
            .to_public_key_pem(LineEnding::LF)
            .unwrap();
        let private_key_pem = private_key.to_pkcs8_pem(LineEnding::LF).unwrap().to_string();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let actor_url = format!("{base}/users/alice");

        let state = Arc::new(Mutex::new(RemoteState {
            actor: serde_json::json!({
                "@context": ["https://www.w3.org/ns/activitystreams", "https://w3id.org/security/v1"],
                "id": actor_url,
                "type": "Person",
                "preferredUsername": "alice",
                "inbox": format!("{actor_url}/inbox"),
                "publicKey": {
                    "id": format!("{actor_url}#main-key"),
                    "owner": actor_url,
                    "publicKeyPem": public_key_pem,
                }
            }),
            ..RemoteState::default()
        }));

        let app = Router::new()
            .route("/users/alice", get(remote_actor))
            .route("/users/alice/inbox", axum::routing::post(remote_inbox))
            .route("/site/*path", get(remote_page))
            .with_state(state.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base,
            private_key_pem,
            state,
        }
    }

    pub fn actor_url(&self) -> String {
        format!("{}/users/alice", self.base)
    }

    pub fn inbox_url(&self) -> String {
        format!("{}/users/alice/inbox", self.base)
    }

    pub fn key_id(&self) -> String {
        format!("{}#main-key", self.actor_url())
    }

    /// Serve `body` at `/site/{path}` and return its full URL
    pub fn serve(&self, path: &str, content_type: &'static str, body: &str) -> String {
        self.state
            .lock()
            .unwrap()
            .pages
            .insert(path.to_string(), (content_type, body.to_string()));
        format!("{}/site/{}", self.base, path)
    }

    /// Activities delivered to alice so far
    pub fn received(&self) -> Vec<Value> {
        self.state.lock().unwrap().received.clone()
    }

    /// Wait until alice has received `count` activities
    pub async fn wait_for(&self, count: usize) -> Vec<Value> {
        for _ in 0..100 {
            let received = self.received();
            if received.len() >= count {
                return received;
            }
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }
        panic!("expected {count} deliveries, got {:?}", self.received());
    }
}

async fn remote_actor(State(state): State<Arc<Mutex<RemoteState>>>) -> Response {
    let actor = state.lock().unwrap().actor.clone();
    ([(header::CONTENT_TYPE, "application/activity+json")], Json(actor)).into_response()
}

async fn remote_inbox(
    State(state): State<Arc<Mutex<RemoteState>>>,
    Json(activity): Json<Value>,
) -> StatusCode {
    state.lock().unwrap().received.push(activity);
    StatusCode::ACCEPTED
}

async fn remote_page(
    State(state): State<Arc<Mutex<RemoteState>>>,
    Path(path): Path<String>,
) -> Response {
    match state.lock().unwrap().pages.get(&path) {
        Some((content_type, body)) => {
            ([(header::CONTENT_TYPE, *content_type)], body.clone()).into_response()
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// An RSS document with one item per `(slug, RFC 2822 date)`
pub fn rss(base: &str, title: &str, items: &[(&str, &str)]) -> String {
    let items: String = items
        .iter()
        .map(|(slug, date)| {
            format!(
                "<item><title>Post {slug}</title><link>{base}/{slug}</link>\
                 <guid>{base}/{slug}</guid><description>About {slug}</description>\
                 <pubDate>{date}</pubDate></item>"
            )
        })
        .collect();
    format!(
        "<?xml version=\"1.0\"?><rss version=\"2.0\"><channel><title>{title}</title>\
         <link>{base}/</link><description>A test blog</description>{items}</channel></rss>"
    )
}
