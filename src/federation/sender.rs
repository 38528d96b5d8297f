//! Activity delivery
//!
//! Signs and POSTs a single activity to a single inbox. No retries here;
//! the caller owns retry policy.

use async_trait::async_trait;
use serde_json::Value;

use super::ids::IdBuilder;
use super::signature::sign_request;
use crate::error::AppError;
use crate::metrics::ACTIVITYPUB_ACTIVITIES_SENT;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ActivitySender: Send + Sync {
    /// Deliver `activity` to `to_inbox`, signed with `by_handle`'s key
    ///
    /// # Errors
    /// Transport failures and non-2xx responses are both delivery failures.
    async fn send(
        &self,
        private_key_pem: &str,
        by_handle: &str,
        to_inbox: &str,
        activity: &Value,
    ) -> Result<(), AppError>;
}

/// Delivers over HTTP with rsa-sha256 signatures
#[derive(Clone)]
pub struct HttpActivitySender {
    http_client: reqwest::Client,
    ids: IdBuilder,
}

impl HttpActivitySender {
    /// The client is expected to carry a request timeout.
    pub fn new(http_client: reqwest::Client, ids: IdBuilder) -> Self {
        Self { http_client, ids }
    }
}

#[async_trait]
impl ActivitySender for HttpActivitySender {
    async fn send(
        &self,
        private_key_pem: &str,
        by_handle: &str,
        to_inbox: &str,
        activity: &Value,
    ) -> Result<(), AppError> {
        let activity_type = activity
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();

        let body = serde_json::to_vec(activity)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to serialize activity: {e}")))?;

        let sig_headers = sign_request(
            to_inbox,
            &body,
            private_key_pem,
            &self.ids.user_key_id(by_handle),
            chrono::Utc::now(),
        )?;

        let result = self
            .http_client
            .post(to_inbox)
            .header("Content-Type", "application/activity+json")
            .header("Accept", "application/activity+json")
            .header("Date", sig_headers.date)
            .header("Digest", sig_headers.digest)
            .header("Signature", sig_headers.signature)
            .body(body)
            .send()
            .await;

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                ACTIVITYPUB_ACTIVITIES_SENT
                    .with_label_values(&[&activity_type, "failed"])
                    .inc();
                return Err(AppError::Federation(format!(
                    "Failed to deliver to {}: {}",
                    to_inbox, e
                )));
            }
        };

        if !response.status().is_success() {
            ACTIVITYPUB_ACTIVITIES_SENT
                .with_label_values(&[&activity_type, "rejected"])
                .inc();
            return Err(AppError::Federation(format!(
                "Inbox {} rejected activity: HTTP {}",
                to_inbox,
                response.status()
            )));
        }

        ACTIVITYPUB_ACTIVITIES_SENT
            .with_label_values(&[&activity_type, "delivered"])
            .inc();
        tracing::debug!(
            inbox = %to_inbox,
            activity_type = %activity_type,
            by = %by_handle,
            "Delivered activity"
        );
        Ok(())
    }
}
