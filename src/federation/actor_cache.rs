//! Remote actor fetching and caching
//!
//! Signature checks dereference `keyId` to an actor document. Fetches are
//! guarded against local/private destinations and cached for a while to
//! reduce remote requests. A document only speaks for the URL it was
//! fetched from.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use super::dto::RemoteActor;
use super::url_guard::check_outbound_url;
use crate::error::AppError;

/// A cached actor is refetched after a failed verification only if it is
/// at least this old
const DEFAULT_MIN_REFETCH_AGE: Duration = Duration::from_secs(60);

/// What we keep about a remote actor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActorInfo {
    pub actor_url: String,
    /// `preferredUsername`, empty if the actor has none
    pub handle: String,
    pub host: String,
    pub inbox: String,
    /// Falls back to `inbox` when the actor has no shared inbox
    pub shared_inbox: String,
    pub key_id: String,
    pub public_key_pem: String,
}

impl ActorInfo {
    /// `@user@host` as shown in mentions
    pub fn moniker(&self) -> String {
        format!("@{}@{}", self.handle, self.host)
    }

    /// Build from a document fetched at `fetched_from`
    ///
    /// # Errors
    /// `Federation` unless the document's `id` is the fetched URL and the
    /// key belongs to that id
    fn from_remote(actor: RemoteActor, fetched_from: &url::Url) -> Result<Self, AppError> {
        let id = url::Url::parse(&actor.id)
            .map_err(|_| AppError::Federation(format!("Actor id is not a URL: {}", actor.id)))?;
        if id != *fetched_from {
            return Err(AppError::Federation(format!(
                "Actor document at {} claims id {}",
                fetched_from, actor.id
            )));
        }
        if actor.public_key.owner != actor.id {
            return Err(AppError::Federation(format!(
                "Key {} is owned by {}, not {}",
                actor.public_key.id, actor.public_key.owner, actor.id
            )));
        }

        let host = id
            .host_str()
            .map(str::to_string)
            .ok_or_else(|| AppError::Federation(format!("Actor id has no host: {}", actor.id)))?;
        let shared_inbox = actor
            .endpoints
            .and_then(|e| e.shared_inbox)
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| actor.inbox.clone());

        Ok(Self {
            handle: actor.preferred_username.unwrap_or_default(),
            host,
            inbox: actor.inbox,
            shared_inbox,
            key_id: actor.public_key.id,
            public_key_pem: actor.public_key.public_key_pem,
            actor_url: actor.id,
        })
    }
}

#[async_trait]
pub trait ActorFetcher: Send + Sync {
    /// Dereference an actor URL (a `#fragment` is ignored)
    async fn fetch(&self, actor_url: &str) -> Result<ActorInfo, AppError>;

    /// Fetch again after a cached copy failed to verify a signature
    async fn refetch(&self, actor_url: &str) -> Result<ActorInfo, AppError> {
        self.fetch(actor_url).await
    }
}

/// Fetches actor documents over HTTP
pub struct HttpActorFetcher {
    http_client: reqwest::Client,
    allow_private_hosts: bool,
}

impl HttpActorFetcher {
    pub fn new(http_client: reqwest::Client, allow_private_hosts: bool) -> Self {
        Self {
            http_client,
            allow_private_hosts,
        }
    }
}

#[async_trait]
impl ActorFetcher for HttpActorFetcher {
    async fn fetch(&self, actor_url: &str) -> Result<ActorInfo, AppError> {
        let parsed = check_outbound_url(actor_url, self.allow_private_hosts).await?;

        let response = self
            .http_client
            .get(parsed.as_str())
            .header("Accept", "application/activity+json")
            .send()
            .await
            .map_err(|e| AppError::Federation(format!("Failed to fetch actor: {}", e)))?;

        if !response.status().is_success() {
            return Err(AppError::Federation(format!(
                "Failed to fetch actor: HTTP {}",
                response.status()
            )));
        }

        let actor: RemoteActor = response
            .json()
            .await
            .map_err(|e| AppError::Federation(format!("Failed to parse actor: {}", e)))?;

        ActorInfo::from_remote(actor, &parsed)
    }
}

#[derive(Debug, Clone)]
struct CachedActor {
    info: ActorInfo,
    cached_at: Instant,
}

/// TTL cache in front of another fetcher
///
/// Keyed by actor URL without fragment. Failed fetches are not cached and
/// expired entries are dropped whenever a new one is stored.
pub struct CachingActorFetcher {
    inner: Arc<dyn ActorFetcher>,
    cache: RwLock<HashMap<String, CachedActor>>,
    ttl: Duration,
    min_refetch_age: Duration,
}

impl CachingActorFetcher {
    pub fn new(inner: Arc<dyn ActorFetcher>, ttl: Duration) -> Self {
        Self {
            inner,
            cache: RwLock::new(HashMap::new()),
            ttl,
            min_refetch_age: DEFAULT_MIN_REFETCH_AGE,
        }
    }

    /// How old a cached entry must be before `refetch` goes to the network
    pub fn with_min_refetch_age(mut self, min_refetch_age: Duration) -> Self {
        self.min_refetch_age = min_refetch_age;
        self
    }

    async fn load(&self, key: String) -> Result<ActorInfo, AppError> {
        // No lock is held across the fetch
        let info = self.inner.fetch(&key).await?;

        let mut cache = self.cache.write().await;
        let ttl = self.ttl;
        cache.retain(|_, cached| cached.cached_at.elapsed() < ttl);
        cache.insert(
            key,
            CachedActor {
                info: info.clone(),
                cached_at: Instant::now(),
            },
        );

        Ok(info)
    }
}

fn cache_key(actor_url: &str) -> String {
    actor_url
        .split('#')
        .next()
        .unwrap_or(actor_url)
        .to_string()
}

#[async_trait]
impl ActorFetcher for CachingActorFetcher {
    async fn fetch(&self, actor_url: &str) -> Result<ActorInfo, AppError> {
        let key = cache_key(actor_url);

        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.get(&key) {
                if cached.cached_at.elapsed() < self.ttl {
                    tracing::debug!(actor = %key, "Actor cache hit");
                    return Ok(cached.info.clone());
                }
            }
        }

        self.load(key).await
    }

    /// A recently cached actor is returned as is, so bad signatures cannot
    /// make us hammer the actor's server
    async fn refetch(&self, actor_url: &str) -> Result<ActorInfo, AppError> {
        let key = cache_key(actor_url);

        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.get(&key) {
                if cached.cached_at.elapsed() < self.min_refetch_age {
                    return Ok(cached.info.clone());
                }
            }
        }

        tracing::debug!(actor = %key, "Refetching cached actor");
        self.load(key).await
    }
}
