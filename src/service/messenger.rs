//! Outbound notes: private replies and follower broadcasts

use chrono::{DateTime, SecondsFormat, Utc};
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;

use crate::data::{ApproveStatus, Repository};
use crate::error::AppError;
use crate::federation::dto::{Activity, Mention, Note};
use crate::federation::ids::{ACTIVITY_PUBLIC, IdBuilder};
use crate::federation::key_store::KeyStore;
use crate::federation::sender::ActivitySender;

const MAX_CONCURRENT_DELIVERIES: usize = 8;

pub struct Messenger {
    repo: Arc<dyn Repository>,
    keys: Arc<KeyStore>,
    sender: Arc<dyn ActivitySender>,
    ids: IdBuilder,
}

impl Messenger {
    pub fn new(
        repo: Arc<dyn Repository>,
        keys: Arc<KeyStore>,
        sender: Arc<dyn ActivitySender>,
        ids: IdBuilder,
    ) -> Self {
        Self {
            repo,
            keys,
            sender,
            ids,
        }
    }

    /// Send a private note that mentions one remote actor
    ///
    /// # Arguments
    /// * `by_handle` - Local sender
    /// * `to_moniker` - `@user@host` of the recipient
    /// * `to_actor_url` - Recipient actor URL
    /// * `to_inbox` - Recipient inbox
    /// * `text` - HTML content
    pub async fn send_reply(
        &self,
        by_handle: &str,
        to_moniker: &str,
        to_actor_url: &str,
        to_inbox: &str,
        text: &str,
    ) -> Result<(), AppError> {
        let private_key = self.keys.get_priv_key(by_handle).await?;
        let id = self.repo.get_next_id().await?;

        let mention = Mention {
            kind: "Mention".to_string(),
            href: to_actor_url.to_string(),
            name: to_moniker.to_string(),
        };
        let activity = self.create_note(
            by_handle,
            id,
            Utc::now(),
            text,
            vec![to_actor_url.to_string()],
            Vec::new(),
            vec![mention],
        );
        let activity = serde_json::to_value(&activity).map_err(|e| AppError::Internal(e.into()))?;

        tracing::info!(by = %by_handle, to = %to_actor_url, "Sending reply");
        self.sender
            .send(&private_key, by_handle, to_inbox, &activity)
            .await
    }

    /// Deliver a public note to every follower, minting a new status id
    pub async fn broadcast(
        &self,
        by_handle: &str,
        published_at: DateTime<Utc>,
        text: &str,
    ) -> Result<(), AppError> {
        let id = self.repo.get_next_id().await?;
        self.broadcast_status(by_handle, id, published_at, text)
            .await
    }

    /// Deliver a public note for an already stored status
    ///
    /// Sends once per distinct shared inbox of the approved followers. A
    /// failed inbox does not stop the others; the first failure is returned.
    pub async fn broadcast_status(
        &self,
        by_handle: &str,
        status_id: u64,
        published_at: DateTime<Utc>,
        text: &str,
    ) -> Result<(), AppError> {
        let followers = self.repo.get_followers(by_handle).await?;

        let mut seen = HashSet::new();
        let inboxes: Vec<String> = followers
            .into_iter()
            .filter(|f| f.approve_status == ApproveStatus::Approved)
            .map(|f| {
                if f.shared_inbox.is_empty() {
                    f.user_inbox
                } else {
                    f.shared_inbox
                }
            })
            .filter(|inbox| seen.insert(inbox.clone()))
            .collect();

        if inboxes.is_empty() {
            tracing::debug!(handle = %by_handle, "No followers to broadcast to");
            return Ok(());
        }

        let private_key = self.keys.get_priv_key(by_handle).await?;
        let activity = self.create_note(
            by_handle,
            status_id,
            published_at,
            text,
            vec![ACTIVITY_PUBLIC.to_string()],
            vec![self.ids.user_followers(by_handle)],
            Vec::new(),
        );
        let activity = serde_json::to_value(&activity).map_err(|e| AppError::Internal(e.into()))?;

        tracing::info!(
            handle = %by_handle,
            inboxes = inboxes.len(),
            "Broadcasting status"
        );

        let results: Vec<(String, Result<(), AppError>)> = stream::iter(inboxes)
            .map(|inbox| {
                let private_key = &private_key;
                let activity = &activity;
                async move {
                    let result = self
                        .sender
                        .send(private_key, by_handle, &inbox, activity)
                        .await;
                    (inbox, result)
                }
            })
            .buffered(MAX_CONCURRENT_DELIVERIES)
            .collect()
            .await;

        let mut first_error = None;
        for (inbox, result) in results {
            if let Err(e) = result {
                tracing::warn!(handle = %by_handle, inbox = %inbox, error = %e, "Delivery failed");
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn create_note(
        &self,
        by_handle: &str,
        id: u64,
        published_at: DateTime<Utc>,
        text: &str,
        to: Vec<String>,
        cc: Vec<String>,
        tag: Vec<Mention>,
    ) -> Activity<Note> {
        let status_url = self.ids.user_status(by_handle, id);
        let published = published_at.to_rfc3339_opts(SecondsFormat::Secs, true);
        let note = Note {
            id: status_url.clone(),
            kind: "Note".to_string(),
            published: published.clone(),
            url: status_url,
            attributed_to: self.ids.user_url(by_handle),
            in_reply_to: None,
            content: text.to_string(),
            to: to.clone(),
            cc: cc.clone(),
            tag,
        };

        let mut activity = Activity::new(
            "Create",
            self.ids.user_status_activity(by_handle, id),
            self.ids.user_url(by_handle),
            note,
        );
        activity.published = Some(published);
        activity.to = to;
        activity.cc = cc;
        activity
    }
}

/// Wrap a stored toot as the `Create` activity that announced it
pub fn toot_activity(ids: &IdBuilder, handle: &str, toot: &crate::data::Toot) -> Activity<Note> {
    let published = toot.tooted_at.to_rfc3339_opts(SecondsFormat::Secs, true);
    let to = vec![ACTIVITY_PUBLIC.to_string()];
    let cc = vec![ids.user_followers(handle)];
    let note = Note {
        id: toot.status_id.clone(),
        kind: "Note".to_string(),
        published: published.clone(),
        url: toot.status_id.clone(),
        attributed_to: ids.user_url(handle),
        in_reply_to: None,
        content: toot.content.clone(),
        to: to.clone(),
        cc: cc.clone(),
        tag: Vec::new(),
    };

    let mut activity = Activity::new(
        "Create",
        format!("{}/activity", toot.status_id),
        ids.user_url(handle),
        note,
    );
    activity.published = Some(published);
    activity.to = to;
    activity.cc = cc;
    activity
}
