//! Inbound HTTP signature checking
//!
//! Untrusted-input failures come back as `SignatureCheck::Problem`; an
//! `Err` means our own machinery broke.

use std::sync::Arc;

use super::actor_cache::{ActorFetcher, ActorInfo};
use super::signature::{SIGNATURE_MISMATCH, parse_signature_header, verify_signature};
use crate::error::AppError;
use crate::service::clock::Clock;

const KEY_ID_MISMATCH: &str = "Signature keyId does not match actor public key id";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureCheck {
    /// The request was signed by this actor
    Verified(ActorInfo),
    /// Why the request cannot be trusted
    Problem(String),
}

pub struct SignatureChecker {
    actors: Arc<dyn ActorFetcher>,
    clock: Arc<dyn Clock>,
}

impl SignatureChecker {
    pub fn new(actors: Arc<dyn ActorFetcher>, clock: Arc<dyn Clock>) -> Self {
        Self { actors, clock }
    }

    /// Check the signature on an inbound request
    ///
    /// # Arguments
    /// * `method` - HTTP method
    /// * `path_and_query` - Request target as received
    /// * `headers` - All request headers
    /// * `body` - Raw request body
    pub async fn check(
        &self,
        method: &str,
        path_and_query: &str,
        headers: &http::HeaderMap,
        body: &[u8],
    ) -> Result<SignatureCheck, AppError> {
        let Some(header) = headers.get("signature").and_then(|h| h.to_str().ok()) else {
            return Ok(SignatureCheck::Problem(
                "Missing or unreadable Signature header".to_string(),
            ));
        };

        let parsed = match parse_signature_header(header) {
            Ok(parsed) => parsed,
            Err(problem) => return Ok(SignatureCheck::Problem(problem)),
        };

        let actor = match self.lookup(&parsed.key_id, false).await? {
            Ok(actor) => actor,
            Err(problem) => return Ok(SignatureCheck::Problem(problem)),
        };

        let problem = match self.verify_with(
            &actor,
            &parsed.key_id,
            method,
            path_and_query,
            headers,
            body,
        ) {
            None => return Ok(SignatureCheck::Verified(actor)),
            Some(problem) => problem,
        };
        if problem != KEY_ID_MISMATCH && problem != SIGNATURE_MISMATCH {
            return Ok(SignatureCheck::Problem(problem));
        }

        // The actor may have rotated its key since we cached it
        let refreshed = match self.lookup(&parsed.key_id, true).await? {
            Ok(refreshed) if refreshed != actor => refreshed,
            _ => return Ok(SignatureCheck::Problem(problem)),
        };
        tracing::debug!(actor = %refreshed.actor_url, "Retrying signature with refetched actor");

        match self.verify_with(
            &refreshed,
            &parsed.key_id,
            method,
            path_and_query,
            headers,
            body,
        ) {
            None => Ok(SignatureCheck::Verified(refreshed)),
            Some(problem) => Ok(SignatureCheck::Problem(problem)),
        }
    }

    /// Dereference the signing actor; unreachable actors are a problem,
    /// not an error
    async fn lookup(
        &self,
        key_id: &str,
        refetch: bool,
    ) -> Result<Result<ActorInfo, String>, AppError> {
        let fetched = if refetch {
            self.actors.refetch(key_id).await
        } else {
            self.actors.fetch(key_id).await
        };

        match fetched {
            Ok(actor) => Ok(Ok(actor)),
            Err(AppError::Internal(e)) => Err(AppError::Internal(e)),
            Err(e) => Ok(Err(format!("Cannot dereference signing actor {}: {}", key_id, e))),
        }
    }

    fn verify_with(
        &self,
        actor: &ActorInfo,
        key_id: &str,
        method: &str,
        path_and_query: &str,
        headers: &http::HeaderMap,
        body: &[u8],
    ) -> Option<String> {
        if key_id.contains('#') && actor.key_id != key_id {
            return Some(KEY_ID_MISMATCH.to_string());
        }

        verify_signature(
            method,
            path_and_query,
            headers,
            body,
            &actor.public_key_pem,
            self.clock.now(),
        )
        .err()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::federation::signature::sign_request;
    use crate::service::clock::ManualClock;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use http::{HeaderMap, HeaderValue};
    use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};
    use rsa::{RsaPrivateKey, RsaPublicKey};
    use std::sync::atomic::{AtomicUsize, Ordering};

    const ALICE: &str = "https://remote.example/users/alice";

    struct StaticFetcher {
        actor: Option<ActorInfo>,
    }

    #[async_trait]
    impl ActorFetcher for StaticFetcher {
        async fn fetch(&self, _actor_url: &str) -> Result<ActorInfo, AppError> {
            self.actor
                .clone()
                .ok_or_else(|| AppError::Federation("connection refused".to_string()))
        }
    }

    fn alice(public_key_pem: String) -> ActorInfo {
        ActorInfo {
            actor_url: ALICE.to_string(),
            handle: "alice".to_string(),
            host: "remote.example".to_string(),
            inbox: format!("{ALICE}/inbox"),
            shared_inbox: "https://remote.example/inbox".to_string(),
            key_id: format!("{ALICE}#main-key"),
            public_key_pem,
        }
    }

    fn signed_request(private_pem: &str, body: &[u8], now: chrono::DateTime<Utc>) -> HeaderMap {
        let signed = sign_request(
            "https://parrot.example/inbox",
            body,
            private_pem,
            &format!("{ALICE}#main-key"),
            now,
        )
        .unwrap();
        let mut headers = HeaderMap::new();
        headers.insert("host", HeaderValue::from_str(&signed.host).unwrap());
        headers.insert("date", HeaderValue::from_str(&signed.date).unwrap());
        headers.insert("digest", HeaderValue::from_str(&signed.digest).unwrap());
        headers.insert("signature", HeaderValue::from_str(&signed.signature).unwrap());
        headers
    }

    fn keys() -> (String, String) {
        let mut rng = rand::thread_rng();
        let private_key = RsaPrivateKey::new(&mut rng, 1024).unwrap();
        (
            private_key.to_pkcs8_pem(LineEnding::LF).unwrap().to_string(),
            RsaPublicKey::from(&private_key)
                .to_public_key_pem(LineEnding::LF)
                .unwrap(),
        )
    }

    fn checker(actor: Option<ActorInfo>, now: chrono::DateTime<Utc>) -> SignatureChecker {
        SignatureChecker::new(
            Arc::new(StaticFetcher { actor }),
            Arc::new(ManualClock::new(now)),
        )
    }

    #[tokio::test]
    async fn test_valid_signature_is_verified() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let (private_pem, public_pem) = keys();
        let body = b"{\"type\":\"Follow\"}";
        let headers = signed_request(&private_pem, body, now);

        let result = checker(Some(alice(public_pem)), now)
            .check("POST", "/inbox", &headers, body)
            .await
            .unwrap();

        let SignatureCheck::Verified(actor) = result else {
            panic!("expected verified signature, got {result:?}");
        };
        assert_eq!(actor.actor_url, ALICE);
    }

    #[tokio::test]
    async fn test_unreachable_actor_is_a_problem() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let (private_pem, _) = keys();
        let headers = signed_request(&private_pem, b"{}", now);

        let result = checker(None, now)
            .check("POST", "/inbox", &headers, b"{}")
            .await
            .unwrap();
        assert!(matches!(result, SignatureCheck::Problem(p) if p.contains("Cannot dereference")));
    }

    #[tokio::test]
    async fn test_missing_header_is_a_problem() {
        let now = Utc::now();
        let result = checker(None, now)
            .check("POST", "/inbox", &HeaderMap::new(), b"{}")
            .await
            .unwrap();
        assert!(matches!(result, SignatureCheck::Problem(_)));
    }

    #[tokio::test]
    async fn test_skewed_clock_is_a_problem() {
        let signed_at = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let (private_pem, public_pem) = keys();
        let headers = signed_request(&private_pem, b"{}", signed_at);

        let result = checker(
            Some(alice(public_pem)),
            signed_at + chrono::Duration::minutes(10),
        )
        .check("POST", "/inbox", &headers, b"{}")
        .await
        .unwrap();
        assert!(matches!(result, SignatureCheck::Problem(p) if p.contains("too old")));
    }

    #[tokio::test]
    async fn test_key_id_mismatch_is_a_problem() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let (private_pem, public_pem) = keys();
        let headers = signed_request(&private_pem, b"{}", now);
        let mut actor = alice(public_pem);
        actor.key_id = format!("{ALICE}#other-key");

        let result = checker(Some(actor), now)
            .check("POST", "/inbox", &headers, b"{}")
            .await
            .unwrap();
        assert!(matches!(result, SignatureCheck::Problem(p) if p.contains("keyId")));
    }

    /// Serves a stale copy until asked to refetch
    struct RotatingFetcher {
        cached: ActorInfo,
        current: ActorInfo,
        refetches: AtomicUsize,
    }

    #[async_trait]
    impl ActorFetcher for RotatingFetcher {
        async fn fetch(&self, _actor_url: &str) -> Result<ActorInfo, AppError> {
            Ok(self.cached.clone())
        }

        async fn refetch(&self, _actor_url: &str) -> Result<ActorInfo, AppError> {
            self.refetches.fetch_add(1, Ordering::SeqCst);
            Ok(self.current.clone())
        }
    }

    #[tokio::test]
    async fn test_rotated_key_is_refetched_once() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let (_, old_public) = keys();
        let (new_private, new_public) = keys();
        let headers = signed_request(&new_private, b"{}", now);

        let fetcher = Arc::new(RotatingFetcher {
            cached: alice(old_public),
            current: alice(new_public),
            refetches: AtomicUsize::new(0),
        });
        let checker = SignatureChecker::new(fetcher.clone(), Arc::new(ManualClock::new(now)));

        let result = checker.check("POST", "/inbox", &headers, b"{}").await.unwrap();
        assert!(matches!(result, SignatureCheck::Verified(_)), "{result:?}");
        assert_eq!(fetcher.refetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_wrong_key_fails_after_one_refetch() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let (_, old_public) = keys();
        let (_, new_public) = keys();
        let (forger_private, _) = keys();
        let headers = signed_request(&forger_private, b"{}", now);

        let fetcher = Arc::new(RotatingFetcher {
            cached: alice(old_public),
            current: alice(new_public),
            refetches: AtomicUsize::new(0),
        });
        let checker = SignatureChecker::new(fetcher.clone(), Arc::new(ManualClock::new(now)));

        let result = checker.check("POST", "/inbox", &headers, b"{}").await.unwrap();
        assert_eq!(result, SignatureCheck::Problem(SIGNATURE_MISMATCH.to_string()));
        assert_eq!(fetcher.refetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_bad_digest_does_not_refetch() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let (private_pem, public_pem) = keys();
        let headers = signed_request(&private_pem, b"{}", now);

        let fetcher = Arc::new(RotatingFetcher {
            cached: alice(public_pem.clone()),
            current: alice(public_pem),
            refetches: AtomicUsize::new(0),
        });
        let checker = SignatureChecker::new(fetcher.clone(), Arc::new(ManualClock::new(now)));

        let result = checker
            .check("POST", "/inbox", &headers, b"{\"tampered\":true}")
            .await
            .unwrap();
        assert!(matches!(result, SignatureCheck::Problem(p) if p.contains("Digest")));
        assert_eq!(fetcher.refetches.load(Ordering::SeqCst), 0);
    }
}
