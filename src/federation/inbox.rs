//! Dispatch of verified inbound activities
//!
//! The HTTP layer has already checked the signature and that the signer is
//! the claimed actor. Handlers here report malformed or misdirected
//! activities as `InboxOutcome::Problem` and reserve `Err` for failures of
//! our own storage or delivery.

use chrono::Utc;
use std::sync::Arc;

use super::actor_cache::ActorInfo;
use super::dto::{InboundActivity, InboundCreate, InboundFollow, InboundUndo, UndoTarget};
use super::ids::IdBuilder;
use crate::data::{ApproveStatus, Follower, Mention, Repository};
use crate::error::AppError;
use crate::service::directory::Directory;
use crate::service::feed_follower::{FeedIngestor, FeedStatus};
use crate::service::feed_source::links_from_fragment;
use crate::service::messenger::Messenger;
use crate::service::texts::{
    REPLY_ALREADY_FOLLOWED, REPLY_BANNED, REPLY_FAILED, REPLY_NATIVE, REPLY_NEW_FEED,
    REPLY_NO_LINK, Texts,
};

/// What became of an inbound activity
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboxOutcome {
    /// The activity changed local state
    Handled,
    /// Accepted without effect
    Ignored,
    /// Malformed or aimed at something we do not have
    Problem(String),
}

#[derive(Clone)]
pub struct InboxProcessor {
    repo: Arc<dyn Repository>,
    directory: Arc<Directory>,
    ingestor: Arc<FeedIngestor>,
    messenger: Arc<Messenger>,
    texts: Arc<dyn Texts>,
    ids: IdBuilder,
}

impl InboxProcessor {
    pub fn new(
        repo: Arc<dyn Repository>,
        directory: Arc<Directory>,
        ingestor: Arc<FeedIngestor>,
        messenger: Arc<Messenger>,
        texts: Arc<dyn Texts>,
    ) -> Self {
        let ids = directory.ids().clone();
        Self {
            repo,
            directory,
            ingestor,
            messenger,
            texts,
            ids,
        }
    }

    /// Apply one inbound activity
    ///
    /// # Arguments
    /// * `inbox_handle` - Owner of the personal inbox, `None` for the shared inbox
    /// * `sender` - Verified signer of the request
    /// * `activity` - Decoded activity
    pub async fn process(
        &self,
        inbox_handle: Option<&str>,
        sender: &ActorInfo,
        activity: InboundActivity,
    ) -> Result<InboxOutcome, AppError> {
        match activity {
            InboundActivity::Follow(follow) => self.handle_follow(inbox_handle, sender, follow).await,
            InboundActivity::Undo(undo) => self.handle_undo(inbox_handle, sender, undo).await,
            InboundActivity::CreateNote(create) => self.handle_create_note(sender, create).await,
            InboundActivity::Other(kind) => {
                tracing::debug!(activity_type = %kind, actor = %sender.actor_url, "Ignoring activity");
                Ok(InboxOutcome::Ignored)
            }
        }
    }

    async fn handle_follow(
        &self,
        inbox_handle: Option<&str>,
        sender: &ActorInfo,
        follow: InboundFollow,
    ) -> Result<InboxOutcome, AppError> {
        let Some(target) = self.ids.handle_from_user_url(&follow.object) else {
            return Ok(InboxOutcome::Problem(format!(
                "Follow target is not a local account: {}",
                follow.object
            )));
        };
        if let Some(handle) = inbox_handle {
            if handle != target {
                return Ok(InboxOutcome::Problem(format!(
                    "Follow for {target} delivered to the inbox of {handle}"
                )));
            }
        }
        if !self.repo.does_account_exist(&target).await? {
            return Ok(InboxOutcome::Problem(format!("No such account: {target}")));
        }

        tracing::info!(
            handle = %target,
            follower = %sender.actor_url,
            "Received follow"
        );

        let follower = Follower {
            user_url: sender.actor_url.clone(),
            handle: sender.handle.clone(),
            host: sender.host.clone(),
            user_inbox: sender.inbox.clone(),
            shared_inbox: sender.shared_inbox.clone(),
            follow_activity_id: follow.id.clone(),
            approve_status: ApproveStatus::Pending,
        };
        self.repo.add_follower(&target, &follower).await?;

        if !self.directory.manually_approves(&target) {
            self.directory
                .accept_follower(&follow.id, &sender.actor_url, &sender.inbox, &target)
                .await?;
        }

        Ok(InboxOutcome::Handled)
    }

    async fn handle_undo(
        &self,
        inbox_handle: Option<&str>,
        sender: &ActorInfo,
        undo: InboundUndo,
    ) -> Result<InboxOutcome, AppError> {
        let embedded = match undo.object {
            UndoTarget::Embedded(embedded) if embedded.kind == "Follow" => embedded,
            UndoTarget::Embedded(embedded) => {
                tracing::debug!(undone = %embedded.kind, "Ignoring undo");
                return Ok(InboxOutcome::Ignored);
            }
            UndoTarget::Reference(id) => {
                tracing::debug!(undone = %id, "Ignoring undo by reference");
                return Ok(InboxOutcome::Ignored);
            }
        };

        let target = embedded
            .object
            .as_deref()
            .and_then(|url| self.ids.handle_from_user_url(url))
            .or_else(|| inbox_handle.map(str::to_string));
        let Some(target) = target else {
            return Ok(InboxOutcome::Problem(
                "Undo does not name a local account".to_string(),
            ));
        };
        if !self.repo.does_account_exist(&target).await? {
            return Ok(InboxOutcome::Problem(format!("No such account: {target}")));
        }

        if self.repo.remove_follower(&target, &sender.actor_url).await? {
            tracing::info!(handle = %target, follower = %sender.actor_url, "Follower removed");
            Ok(InboxOutcome::Handled)
        } else {
            Ok(InboxOutcome::Ignored)
        }
    }

    async fn handle_create_note(
        &self,
        sender: &ActorInfo,
        create: InboundCreate,
    ) -> Result<InboxOutcome, AppError> {
        let note = create.object;

        let mut handles: Vec<String> = note
            .recipients()
            .filter_map(|url| self.ids.handle_from_user_url(url))
            .collect();
        handles.sort();
        handles.dedup();

        let mention = Mention {
            note_id: note.id.clone(),
            actor_url: sender.actor_url.clone(),
            content: note.content.clone(),
            received_at: Utc::now(),
        };

        let mut recorded = false;
        let mut operator_mentioned = false;
        for handle in handles {
            if !self.repo.does_account_exist(&handle).await? {
                continue;
            }
            let is_new = self.repo.record_mention(&handle, &mention).await?;
            recorded = true;
            if is_new && handle == self.directory.operator_handle() {
                operator_mentioned = true;
            }
        }

        if !recorded {
            return Ok(InboxOutcome::Ignored);
        }

        if operator_mentioned {
            let this = self.clone();
            let sender = sender.clone();
            let content = note.content;
            tokio::spawn(async move {
                if let Err(e) = this.answer_operator_mention(&sender, &content).await {
                    tracing::warn!(
                        actor = %sender.actor_url,
                        error = %e,
                        "Failed to answer mention"
                    );
                }
            });
        }

        Ok(InboxOutcome::Handled)
    }

    /// Follow the first outside link of a note sent to the operator and
    /// tell its author how it went
    pub(crate) async fn answer_operator_mention(
        &self,
        sender: &ActorInfo,
        content: &str,
    ) -> Result<(), AppError> {
        let link = links_from_fragment(content)
            .into_iter()
            .find(|link| !self.is_local(link));

        let moniker = sender.moniker();
        let text = match link {
            None => self.texts.render(REPLY_NO_LINK, &[("moniker", &moniker)])?,
            Some(link) => {
                tracing::info!(actor = %sender.actor_url, url = %link, "Feed requested by mention");
                match self.ingestor.resolve_and_follow(&link).await {
                    Ok((account, status)) => {
                        let template = match status {
                            FeedStatus::New => REPLY_NEW_FEED,
                            FeedStatus::AlreadyFollowed => REPLY_ALREADY_FOLLOWED,
                            FeedStatus::ActivityPubNative => REPLY_NATIVE,
                            FeedStatus::Banned => REPLY_BANNED,
                        };
                        let (account, account_url) = account
                            .map(|a| (format!("{}@{}", a.handle, self.ids.host()), a.user_url))
                            .unwrap_or_default();
                        self.texts.render(
                            template,
                            &[
                                ("moniker", &moniker),
                                ("account", &account),
                                ("accountUrl", &account_url),
                            ],
                        )?
                    }
                    Err(e) => {
                        tracing::warn!(url = %link, error = %e, "Could not follow requested feed");
                        self.texts.render(REPLY_FAILED, &[("moniker", &moniker)])?
                    }
                }
            }
        };

        self.messenger
            .send_reply(
                self.directory.operator_handle(),
                &moniker,
                &sender.actor_url,
                &sender.inbox,
                &text,
            )
            .await
    }

    fn is_local(&self, link: &str) -> bool {
        url::Url::parse(link)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.eq_ignore_ascii_case(self.ids.host())))
            .unwrap_or(false)
    }
}
