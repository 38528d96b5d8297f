//! Feed ingestion and the re-check scheduler
//!
//! `resolve_and_follow` turns a site or feed URL into a bridged account.
//! The scheduler loop keeps polling due feeds forever and turns new items
//! into stored, broadcast statuses.

use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use std::sync::Arc;

use super::clock::{Clock, RandomSource, SystemClock, ThreadRandom};
use super::feed_source::{
    BlockedFeeds, DomainBlockList, FeedItem, PageFetcher, ParsedFeed, discover_feed_url,
    is_native_generator, page_metadata, parse_feed, strip_html,
};
use super::messenger::Messenger;
use super::texts::{ACCT_BIO, TOOT_NEW_POST, Texts};
use crate::config::ScheduleConfig;
use crate::data::{Account, FeedPost, NewAccount, Repository, Toot};
use crate::error::AppError;
use crate::federation::ids::{IdBuilder, derive_handle};
use crate::federation::key_store::KeyStore;
use crate::metrics::{FEED_CHECKS_TOTAL, FEEDS_ADDED, FEEDS_DUE, FEEDS_REQUESTED, POSTS_SAVED};

/// Result of asking for a feed to be followed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedStatus {
    /// A new account was created
    New,
    /// The feed was bridged before; its account is returned
    AlreadyFollowed,
    /// The feed comes from a platform that federates on its own
    ActivityPubNative,
    /// The feed is on the block list
    Banned,
}

impl FeedStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            FeedStatus::New => "new",
            FeedStatus::AlreadyFollowed => "already_followed",
            FeedStatus::ActivityPubNative => "activitypub_native",
            FeedStatus::Banned => "banned",
        }
    }
}

/// What one scheduler pass did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    /// Nothing was due
    Idle,
    /// The feed was read; number of new posts
    Updated { handle: String, new_posts: usize },
    /// The check failed and the feed was pushed back
    Rescheduled { handle: String },
}

struct SiteInfo {
    site_url: String,
    title: String,
    description: String,
    feed: ParsedFeed,
}

pub struct FeedIngestor {
    repo: Arc<dyn Repository>,
    keys: Arc<KeyStore>,
    messenger: Arc<Messenger>,
    texts: Arc<dyn Texts>,
    fetcher: Arc<dyn PageFetcher>,
    blocked: Arc<dyn BlockedFeeds>,
    clock: Arc<dyn Clock>,
    random: Arc<dyn RandomSource>,
    ids: IdBuilder,
    schedule: ScheduleConfig,
    native_generators: Vec<String>,
}

impl FeedIngestor {
    /// Ingestor with wall-clock time, thread RNG, no blocked feeds and
    /// default schedule bands
    pub fn new(
        repo: Arc<dyn Repository>,
        keys: Arc<KeyStore>,
        messenger: Arc<Messenger>,
        texts: Arc<dyn Texts>,
        fetcher: Arc<dyn PageFetcher>,
        ids: IdBuilder,
    ) -> Self {
        Self {
            repo,
            keys,
            messenger,
            texts,
            fetcher,
            blocked: Arc::new(DomainBlockList::new(&[])),
            clock: Arc::new(SystemClock),
            random: Arc::new(ThreadRandom),
            ids,
            schedule: ScheduleConfig::default(),
            native_generators: vec!["mastodon".to_string()],
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>, random: Arc<dyn RandomSource>) -> Self {
        self.clock = clock;
        self.random = random;
        self
    }

    pub fn with_schedule(mut self, schedule: ScheduleConfig) -> Self {
        self.schedule = schedule;
        self
    }

    pub fn with_feed_rules(
        mut self,
        blocked: Arc<dyn BlockedFeeds>,
        native_generators: Vec<String>,
    ) -> Self {
        self.blocked = blocked;
        self.native_generators = native_generators;
        self
    }

    /// Find the feed behind `url` and make sure an account bridges it
    ///
    /// # Returns
    /// The account (absent for `Banned` and `ActivityPubNative`) and how
    /// the request was resolved
    ///
    /// # Errors
    /// Network and parse failures, an unusable URL, or no feed at the page
    pub async fn resolve_and_follow(
        &self,
        url: &str,
    ) -> Result<(Option<Account>, FeedStatus), AppError> {
        FEEDS_REQUESTED.inc();
        let url = url.trim().trim_end_matches('/');
        tracing::info!(url = %url, "Retrieving site information");

        let parsed = url::Url::parse(url)
            .map_err(|e| AppError::Validation(format!("Invalid URL {}: {}", url, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(AppError::Validation(format!("Unsupported URL: {}", url)));
        }

        if self.blocked.is_blocked(url).await? {
            tracing::info!(url = %url, "Refusing blocked feed");
            return Ok((None, FeedStatus::Banned));
        }

        let Some(site) = self.get_site_info(url).await? else {
            return Ok((None, FeedStatus::Banned));
        };

        let handle = derive_handle(&site.site_url).ok_or_else(|| {
            AppError::Validation(format!("Cannot derive a handle from {}", site.site_url))
        })?;

        if is_native_generator(site.feed.generator.as_deref(), &self.native_generators) {
            tracing::info!(url = %url, "Feed is from an ActivityPub-native platform");
            return Ok((None, FeedStatus::ActivityPubNative));
        }

        let is_new = if self.repo.does_account_exist(&handle).await? {
            false
        } else {
            self.create_account(&handle, &site).await?
        };

        tracing::info!(handle = %handle, is_new, "Account resolved");
        if is_new {
            FEEDS_ADDED.inc();
        }

        let account = self.repo.get_account(&handle).await?.ok_or_else(|| {
            AppError::Internal(anyhow::anyhow!("Account {} vanished after insert", handle))
        })?;

        // A brand new account stores the backlog without broadcasting it
        self.update_account_posts(&account, &site.feed, !is_new)
            .await?;
        let account = self.repo.get_account(&handle).await?.unwrap_or(account);

        let status = if is_new {
            FeedStatus::New
        } else {
            FeedStatus::AlreadyFollowed
        };
        Ok((Some(account), status))
    }

    /// Generate keys and insert the account; `false` if another request
    /// created it first
    async fn create_account(&self, handle: &str, site: &SiteInfo) -> Result<bool, AppError> {
        let key_pair = self.keys.make_key_pair().await?;
        let now = self.clock.now();
        let description = strip_html(&site.description);
        let summary = self
            .texts
            .render(ACCT_BIO, &[("description", description.as_str())])?;

        self.repo
            .add_account_if_not_exist(
                &NewAccount {
                    handle: handle.to_string(),
                    user_url: self.ids.user_url(handle),
                    display_name: name_with_parrot(&strip_html(&site.title), handle),
                    summary,
                    profile_image_url: String::new(),
                    site_url: site.site_url.clone(),
                    feed_url: site.feed.feed_url.clone(),
                    feed_last_updated: DateTime::UNIX_EPOCH,
                    next_check_due: now,
                    public_key_pem: key_pair.public_key_pem,
                },
                &key_pair.private_key_pem,
            )
            .await
    }

    /// `None` if discovery led to a blocked feed
    async fn get_site_info(&self, url: &str) -> Result<Option<SiteInfo>, AppError> {
        let body = self.fetcher.fetch(url).await?;

        if let Ok(feed) = parse_feed(url, &body) {
            return Ok(Some(SiteInfo {
                site_url: feed.site_url.clone(),
                title: feed.title.clone(),
                description: feed.description.clone(),
                feed,
            }));
        }

        let html = String::from_utf8_lossy(&body);
        let feed_url = discover_feed_url(url, &html)
            .ok_or_else(|| AppError::Feed(format!("No feed URL found at {}", url)))?;
        let (page_title, page_description) = page_metadata(&html);

        if self.blocked.is_blocked(&feed_url).await? {
            tracing::info!(feed_url = %feed_url, "Refusing blocked feed");
            return Ok(None);
        }

        let feed_body = self.fetcher.fetch(&feed_url).await?;
        let feed = parse_feed(&feed_url, &feed_body)?;

        Ok(Some(SiteInfo {
            site_url: url.to_string(),
            title: page_title.unwrap_or_else(|| feed.title.clone()),
            description: page_description.unwrap_or_else(|| feed.description.clone()),
            feed,
        }))
    }

    /// Store the items newer than the account's watermark, oldest first
    ///
    /// # Arguments
    /// * `account` - Account the feed belongs to
    /// * `feed` - Freshly parsed feed
    /// * `broadcast` - Deliver new statuses to followers
    ///
    /// # Returns
    /// Number of newly stored posts
    pub async fn update_account_posts(
        &self,
        account: &Account,
        feed: &ParsedFeed,
        broadcast: bool,
    ) -> Result<usize, AppError> {
        let watermark = self.repo.get_feed_last_updated(&account.id).await?;
        let (keepers, new_watermark) = sorted_keepers(&feed.items, watermark);

        let mut new_posts = 0;
        for (post_time, item) in keepers {
            if self
                .store_post_if_new(account, post_time, item, broadcast)
                .await?
            {
                new_posts += 1;
            }
        }

        let next_check_due = self.next_check_time(new_watermark);
        self.repo
            .update_account_feed_times(&account.id, new_watermark, next_check_due)
            .await?;

        tracing::debug!(
            handle = %account.handle,
            new_posts,
            next_check_due = %next_check_due,
            "Feed posts updated"
        );
        Ok(new_posts)
    }

    async fn store_post_if_new(
        &self,
        account: &Account,
        post_time: DateTime<Utc>,
        item: &FeedItem,
        broadcast: bool,
    ) -> Result<bool, AppError> {
        let title = strip_html(&item.title);
        let description = strip_html(&item.description);
        let post_hash = item_hash(item);

        let is_new = self
            .repo
            .add_feed_post_if_new(
                &account.id,
                &FeedPost {
                    post_hash,
                    post_time,
                    link: item.link.clone(),
                    title: title.clone(),
                    description: description.clone(),
                },
            )
            .await?;
        if !is_new {
            return Ok(false);
        }
        POSTS_SAVED.inc();

        let pretty_url = pretty_url(&item.link);
        let content = self.texts.render(
            TOOT_NEW_POST,
            &[
                ("title", title.as_str()),
                ("url", item.link.as_str()),
                ("prettyUrl", pretty_url),
                ("description", description.as_str()),
            ],
        )?;

        let id = self.repo.get_next_id().await?;
        let tooted_at = self.clock.now();
        self.repo
            .add_toot(
                &account.id,
                &Toot {
                    post_hash,
                    tooted_at,
                    status_id: self.ids.user_status(&account.handle, id),
                    content: content.clone(),
                },
            )
            .await?;

        if broadcast {
            // The toot is stored; a failed delivery is not an ingestion failure
            if let Err(e) = self
                .messenger
                .broadcast_status(&account.handle, id, tooted_at, &content)
                .await
            {
                tracing::warn!(handle = %account.handle, error = %e, "Broadcast incomplete");
            }
        }

        Ok(true)
    }

    /// When to look at a feed again, given when it last changed
    ///
    /// The base interval grows with idle time and is jittered by a factor
    /// in `[0.8, 1.2)`.
    pub fn next_check_time(&self, last_changed: DateTime<Utc>) -> DateTime<Utc> {
        let now = self.clock.now();
        let idle = now - last_changed;

        let base_hours = if idle > Duration::weeks(4) {
            self.schedule.older_hours
        } else if idle > Duration::weeks(1) {
            self.schedule.weeks4_hours
        } else if idle > Duration::days(1) {
            self.schedule.week_hours
        } else {
            self.schedule.day_hours
        };

        let hours = base_hours * (0.8 + 0.4 * self.random.next_unit());
        now + Duration::milliseconds((hours * 3_600_000.0) as i64)
    }

    /// Claim the most overdue feed and check it
    pub async fn check_due_feed(&self) -> Result<CheckOutcome, AppError> {
        let (account, due) = self.repo.get_account_to_check(self.clock.now()).await?;
        FEEDS_DUE.set(due as i64);

        let Some(account) = account else {
            return Ok(CheckOutcome::Idle);
        };

        let last_updated = account.feed_last_updated;
        match self.update_feed(&account).await {
            Ok(new_posts) => {
                FEED_CHECKS_TOTAL.with_label_values(&["updated"]).inc();
                Ok(CheckOutcome::Updated {
                    handle: account.handle,
                    new_posts,
                })
            }
            Err(e) => {
                FEED_CHECKS_TOTAL.with_label_values(&["failed"]).inc();
                tracing::error!(handle = %account.handle, error = %e, "Error updating feed");

                // Back off as if nothing new had appeared
                let next_check_due = self.next_check_time(last_updated);
                self.repo
                    .update_account_feed_times(&account.id, last_updated, next_check_due)
                    .await?;
                Ok(CheckOutcome::Rescheduled {
                    handle: account.handle,
                })
            }
        }
    }

    async fn update_feed(&self, account: &Account) -> Result<usize, AppError> {
        tracing::info!(handle = %account.handle, feed_url = %account.feed_url, "Updating feed");
        let body = self.fetcher.fetch(&account.feed_url).await?;
        let feed = parse_feed(&account.feed_url, &body)?;
        self.update_account_posts(account, &feed, true).await
    }

    /// Poll due feeds forever
    pub async fn run_scheduler(self: Arc<Self>) {
        let idle = std::time::Duration::from_secs(self.schedule.idle_wake_seconds);
        tracing::info!("Feed check loop started");

        loop {
            match self.check_due_feed().await {
                Ok(CheckOutcome::Idle) => {
                    tracing::debug!(seconds = idle.as_secs(), "No feeds to check; sleeping");
                    self.clock.sleep(idle).await;
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::error!(error = %e, "Failed to get next feed due for checking");
                    self.clock.sleep(idle).await;
                }
            }
        }
    }
}

/// Items newer than `watermark`, oldest first, and the advanced watermark
fn sorted_keepers(
    items: &[FeedItem],
    watermark: DateTime<Utc>,
) -> (Vec<(DateTime<Utc>, &FeedItem)>, DateTime<Utc>) {
    let mut new_watermark = watermark;
    let mut keepers: Vec<(DateTime<Utc>, &FeedItem)> = items
        .iter()
        .filter_map(|item| {
            let post_time = [item.published, item.updated]
                .into_iter()
                .flatten()
                .filter(|t| *t > watermark)
                .max()?;
            Some((post_time, item))
        })
        .collect();

    for (post_time, _) in &keepers {
        if *post_time > new_watermark {
            new_watermark = *post_time;
        }
    }
    keepers.sort_by_key(|(post_time, _)| *post_time);

    (keepers, new_watermark)
}

/// Stable fingerprint of an item across re-fetches
pub fn item_hash(item: &FeedItem) -> i64 {
    let digest = Sha256::digest(format!("{}\t{}", item.guid, item.link).as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    i64::from_be_bytes(bytes)
}

fn pretty_url(link: &str) -> &str {
    let link = link
        .strip_prefix("https://")
        .or_else(|| link.strip_prefix("http://"))
        .unwrap_or(link);
    link.trim_end_matches('/')
}

fn name_with_parrot(title: &str, handle: &str) -> String {
    let name = if title.is_empty() { handle } else { title };
    format!("{name} 🦜")
}
