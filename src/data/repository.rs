//! Persistence contract used by the federation core
//!
//! Every operation is individually atomic. The scheduler relies on
//! `get_account_to_check` claiming the returned account, and ingestion
//! relies on `add_feed_post_if_new` being idempotent per
//! `(account_id, post_hash)`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::models::{Account, ApproveStatus, FeedPost, Follower, Mention, NewAccount, Toot};
use crate::error::AppError;

#[async_trait]
pub trait Repository: Send + Sync {
    /// Insert the account unless the handle is taken.
    ///
    /// # Returns
    /// `true` if the account was created by this call
    async fn add_account_if_not_exist(
        &self,
        account: &NewAccount,
        private_key_pem: &str,
    ) -> Result<bool, AppError>;

    async fn get_account(&self, handle: &str) -> Result<Option<Account>, AppError>;

    async fn does_account_exist(&self, handle: &str) -> Result<bool, AppError>;

    async fn get_private_key(&self, handle: &str) -> Result<Option<String>, AppError>;

    async fn get_feed_last_updated(&self, account_id: &str) -> Result<DateTime<Utc>, AppError>;

    /// The watermark only moves forward; an older value leaves it as is
    async fn update_account_feed_times(
        &self,
        account_id: &str,
        feed_last_updated: DateTime<Utc>,
        next_check_due: DateTime<Utc>,
    ) -> Result<(), AppError>;

    /// # Returns
    /// `true` if the post was not stored before
    async fn add_feed_post_if_new(&self, account_id: &str, post: &FeedPost)
    -> Result<bool, AppError>;

    async fn add_toot(&self, account_id: &str, toot: &Toot) -> Result<(), AppError>;

    /// Claim the most overdue feed account.
    ///
    /// # Returns
    /// The claimed account (if any) and how many accounts were due
    async fn get_account_to_check(
        &self,
        now: DateTime<Utc>,
    ) -> Result<(Option<Account>, u64), AppError>;

    /// Next value of the process-wide strictly increasing id sequence
    async fn get_next_id(&self) -> Result<u64, AppError>;

    /// Insert or refresh a follower. An existing approval is kept.
    async fn add_follower(&self, handle: &str, follower: &Follower) -> Result<(), AppError>;

    /// # Returns
    /// `true` if a follower row was removed
    async fn remove_follower(&self, handle: &str, follower_url: &str) -> Result<bool, AppError>;

    async fn get_followers(&self, handle: &str) -> Result<Vec<Follower>, AppError>;

    async fn set_follower_approve_status(
        &self,
        handle: &str,
        follower_url: &str,
        status: ApproveStatus,
    ) -> Result<(), AppError>;

    async fn get_post_count(&self, handle: &str) -> Result<u64, AppError>;

    async fn get_toot_count(&self, handle: &str) -> Result<u64, AppError>;

    async fn get_approved_follower_count(&self, handle: &str) -> Result<u64, AppError>;

    /// # Returns
    /// `true` if the note had not been recorded for this account yet
    async fn record_mention(&self, handle: &str, mention: &Mention) -> Result<bool, AppError>;

    async fn get_mention_count(&self, handle: &str) -> Result<u64, AppError>;

    /// Newest toots first
    async fn get_recent_toots(&self, handle: &str, limit: u32) -> Result<Vec<Toot>, AppError>;
}
