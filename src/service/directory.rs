//! Outward views of local accounts and the follow handshake
//!
//! Every lookup returns `Ok(None)` for unknown handles so the HTTP layer
//! can answer 404 without treating it as a failure.

use chrono::{SecondsFormat, Utc};
use std::sync::Arc;

use super::messenger::toot_activity;
use crate::config::OperatorConfig;
use crate::data::{ApproveStatus, NewAccount, Repository};
use crate::error::AppError;
use crate::federation::dto::{
    Activity, Actor, Endpoints, FollowObject, Image, OrderedCollection, OrderedCollectionPage,
    PropertyValue, PublicKey, actor_context,
};
use crate::federation::ids::{ACTIVITY_STREAMS_CONTEXT, IdBuilder};
use crate::federation::key_store::KeyStore;
use crate::federation::sender::ActivitySender;
use crate::federation::webfinger::{WebFingerResponse, generate_webfinger_response};

const OUTBOX_PAGE_SIZE: u32 = 20;

pub struct Directory {
    repo: Arc<dyn Repository>,
    keys: Arc<KeyStore>,
    sender: Arc<dyn ActivitySender>,
    ids: IdBuilder,
    operator: OperatorConfig,
}

impl Directory {
    pub fn new(
        repo: Arc<dyn Repository>,
        keys: Arc<KeyStore>,
        sender: Arc<dyn ActivitySender>,
        ids: IdBuilder,
        operator: OperatorConfig,
    ) -> Self {
        Self {
            repo,
            keys,
            sender,
            ids,
            operator,
        }
    }

    pub fn operator_handle(&self) -> &str {
        &self.operator.handle
    }

    pub fn ids(&self) -> &IdBuilder {
        &self.ids
    }

    /// Create the operator account with fresh keys unless it exists
    ///
    /// # Returns
    /// `true` if the account was created now
    pub async fn ensure_operator_account(&self) -> Result<bool, AppError> {
        let handle = self.operator.handle.to_lowercase();
        if self.repo.does_account_exist(&handle).await? {
            return Ok(false);
        }

        let key_pair = self.keys.make_key_pair().await?;
        let now = Utc::now();
        let created = self
            .repo
            .add_account_if_not_exist(
                &NewAccount {
                    handle: handle.clone(),
                    user_url: self.ids.user_url(&handle),
                    display_name: self.operator.display_name.clone(),
                    summary: self.operator.bio.clone(),
                    profile_image_url: self.operator.profile_image_url.clone(),
                    site_url: self.ids.user_profile(&handle),
                    feed_url: String::new(),
                    feed_last_updated: now,
                    next_check_due: now,
                    public_key_pem: key_pair.public_key_pem,
                },
                &key_pair.private_key_pem,
            )
            .await?;

        if created {
            tracing::info!(handle = %handle, "Created operator account");
        }
        Ok(created)
    }

    /// Whether follows of `handle` wait for approval
    pub fn manually_approves(&self, handle: &str) -> bool {
        self.is_operator(handle) && self.operator.manually_approves_followers
    }

    fn is_operator(&self, handle: &str) -> bool {
        handle.eq_ignore_ascii_case(&self.operator.handle)
    }

    pub async fn get_webfinger(&self, handle: &str) -> Result<Option<WebFingerResponse>, AppError> {
        let handle = handle.to_lowercase();
        if !self.repo.does_account_exist(&handle).await? {
            return Ok(None);
        }
        Ok(Some(generate_webfinger_response(&self.ids, &handle)))
    }

    /// Actor document for a local account
    pub async fn get_user_info(&self, handle: &str) -> Result<Option<Actor>, AppError> {
        let handle = handle.to_lowercase();
        let Some(account) = self.repo.get_account(&handle).await? else {
            return Ok(None);
        };

        let user_url = self.ids.user_url(&handle);
        let (name, summary, icon_url, header_url, website) = if self.is_operator(&handle) {
            let base = self.ids.user_profile(&handle);
            (
                self.operator.display_name.clone(),
                self.operator.bio.clone(),
                self.operator.profile_image_url.clone(),
                self.operator.header_image_url.clone(),
                website_link(&base, self.ids.host()),
            )
        } else {
            let bare = account
                .site_url
                .strip_prefix("https://")
                .or_else(|| account.site_url.strip_prefix("http://"))
                .unwrap_or(&account.site_url);
            (
                account.display_name.clone(),
                account.summary.clone(),
                account.profile_image_url.clone(),
                String::new(),
                website_link(&account.site_url, bare),
            )
        };

        Ok(Some(Actor {
            context: actor_context(),
            id: user_url.clone(),
            kind: "Service".to_string(),
            preferred_username: handle.clone(),
            name,
            summary,
            url: self.ids.user_profile(&handle),
            manually_approves_followers: self.manually_approves(&handle),
            discoverable: true,
            published: account
                .created_at
                .to_rfc3339_opts(SecondsFormat::Secs, true),
            inbox: self.ids.user_inbox(&handle),
            outbox: self.ids.user_outbox(&handle),
            followers: self.ids.user_followers(&handle),
            following: self.ids.user_following(&handle),
            endpoints: Endpoints {
                shared_inbox: self.ids.shared_inbox(),
            },
            public_key: PublicKey {
                id: self.ids.user_key_id(&handle),
                owner: user_url,
                public_key_pem: account.public_key_pem,
            },
            attachment: vec![PropertyValue {
                kind: "PropertyValue".to_string(),
                name: "Website".to_string(),
                value: website,
            }],
            icon: non_empty(&icon_url).map(Image::new),
            image: non_empty(&header_url).map(Image::new),
        }))
    }

    pub async fn get_outbox_summary(
        &self,
        handle: &str,
    ) -> Result<Option<OrderedCollection>, AppError> {
        let handle = handle.to_lowercase();
        if !self.repo.does_account_exist(&handle).await? {
            return Ok(None);
        }
        let total = self.repo.get_toot_count(&handle).await?;
        let outbox = self.ids.user_outbox(&handle);
        Ok(Some(OrderedCollection::summary(
            outbox.clone(),
            total,
            Some(format!("{outbox}?page=true")),
            Some(format!("{outbox}?min_id=0&page=true")),
        )))
    }

    /// Most recent statuses as `Create` activities
    pub async fn get_outbox_page(
        &self,
        handle: &str,
    ) -> Result<Option<OrderedCollectionPage>, AppError> {
        let handle = handle.to_lowercase();
        if !self.repo.does_account_exist(&handle).await? {
            return Ok(None);
        }
        let total = self.repo.get_toot_count(&handle).await?;
        let toots = self
            .repo
            .get_recent_toots(&handle, OUTBOX_PAGE_SIZE)
            .await?;
        let outbox = self.ids.user_outbox(&handle);

        Ok(Some(OrderedCollectionPage {
            context: ACTIVITY_STREAMS_CONTEXT.to_string(),
            id: format!("{outbox}?page=true"),
            kind: "OrderedCollectionPage".to_string(),
            part_of: outbox,
            total_items: total,
            ordered_items: toots
                .iter()
                .map(|toot| toot_activity(&self.ids, &handle, toot))
                .collect(),
        }))
    }

    pub async fn get_followers_summary(
        &self,
        handle: &str,
    ) -> Result<Option<OrderedCollection>, AppError> {
        let handle = handle.to_lowercase();
        if !self.repo.does_account_exist(&handle).await? {
            return Ok(None);
        }
        let total = self.repo.get_approved_follower_count(&handle).await?;
        Ok(Some(OrderedCollection::summary(
            self.ids.user_followers(&handle),
            total,
            None,
            None,
        )))
    }

    /// Bridged accounts follow nobody
    pub async fn get_following_summary(
        &self,
        handle: &str,
    ) -> Result<Option<OrderedCollection>, AppError> {
        let handle = handle.to_lowercase();
        if !self.repo.does_account_exist(&handle).await? {
            return Ok(None);
        }
        Ok(Some(OrderedCollection::summary(
            self.ids.user_following(&handle),
            0,
            None,
            None,
        )))
    }

    /// Send `Accept{Follow}` and, once delivered, mark the follower approved
    ///
    /// The two steps are not atomic: if marking fails after a successful
    /// send, the remote side considers the follow accepted while the local
    /// row stays pending.
    pub async fn accept_follower(
        &self,
        follow_activity_id: &str,
        follower_url: &str,
        follower_inbox: &str,
        followed_handle: &str,
    ) -> Result<(), AppError> {
        tracing::info!(
            handle = %followed_handle,
            follower = %follower_url,
            "Accepting follow"
        );

        let private_key = self.keys.get_priv_key(followed_handle).await?;
        let accept_id = self.repo.get_next_id().await?;
        let followed_url = self.ids.user_url(followed_handle);

        let accept = Activity::new(
            "Accept",
            self.ids.activity_url(accept_id),
            followed_url.clone(),
            FollowObject {
                id: follow_activity_id.to_string(),
                kind: "Follow".to_string(),
                actor: follower_url.to_string(),
                object: followed_url,
            },
        );
        let accept = serde_json::to_value(&accept).map_err(|e| AppError::Internal(e.into()))?;

        self.sender
            .send(&private_key, followed_handle, follower_inbox, &accept)
            .await?;

        self.repo
            .set_follower_approve_status(followed_handle, follower_url, ApproveStatus::Approved)
            .await
    }
}

fn website_link(href: &str, text: &str) -> String {
    format!(
        "<a href=\"{}\" target=\"_blank\" rel=\"nofollow noopener noreferrer me\" translate=\"no\">{}</a>",
        html_escape::encode_double_quoted_attribute(href),
        html_escape::encode_text(text)
    )
}

fn non_empty(value: &str) -> Option<&str> {
    if value.is_empty() { None } else { Some(value) }
}
