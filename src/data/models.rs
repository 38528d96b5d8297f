//! Data models
//!
//! Rust structs representing database entities.
//! Accounts use ULID for IDs and chrono for timestamps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// ID Types
// =============================================================================

/// Entity ID wrapper (ULID format, 26 characters)
///
/// Example: "01ARZ3NDEKTSV4RRFFQ69G5FAV"
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub String);

impl EntityId {
    /// Generate a new ULID
    pub fn new() -> Self {
        Self(ulid::Ulid::new().to_string())
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Account
// =============================================================================

/// One federated actor: the operator, or a bridged feed
///
/// The private key is deliberately not part of this struct; it is only
/// reachable through the key store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub handle: String,
    pub created_at: DateTime<Utc>,
    pub user_url: String,
    pub display_name: String,
    pub summary: String,
    pub profile_image_url: String,
    pub site_url: String,
    /// Empty for the operator account
    pub feed_url: String,
    pub feed_last_updated: DateTime<Utc>,
    pub next_check_due: DateTime<Utc>,
    pub public_key_pem: String,
}

impl Account {
    /// Accounts without a feed URL (the operator) are never polled
    pub fn is_feed(&self) -> bool {
        !self.feed_url.is_empty()
    }
}

/// Fields needed to create an account
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub handle: String,
    pub user_url: String,
    pub display_name: String,
    pub summary: String,
    pub profile_image_url: String,
    pub site_url: String,
    pub feed_url: String,
    pub feed_last_updated: DateTime<Utc>,
    pub next_check_due: DateTime<Utc>,
    pub public_key_pem: String,
}

// =============================================================================
// Feed posts and toots
// =============================================================================

/// Deduplication record for one feed item already seen
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedPost {
    pub post_hash: i64,
    pub post_time: DateTime<Utc>,
    pub link: String,
    pub title: String,
    pub description: String,
}

/// Materialized outbound post derived from a feed post
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toot {
    pub post_hash: i64,
    pub tooted_at: DateTime<Utc>,
    pub status_id: String,
    pub content: String,
}

// =============================================================================
// Followers
// =============================================================================

/// Approval state of a follower
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApproveStatus {
    Pending,
    Approved,
}

impl ApproveStatus {
    pub fn as_i64(self) -> i64 {
        match self {
            ApproveStatus::Pending => 0,
            ApproveStatus::Approved => 1,
        }
    }

    pub fn from_i64(value: i64) -> Self {
        if value == 1 {
            ApproveStatus::Approved
        } else {
            ApproveStatus::Pending
        }
    }
}

/// A remote actor following one of our accounts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Follower {
    pub user_url: String,
    pub handle: String,
    pub host: String,
    pub user_inbox: String,
    pub shared_inbox: String,
    pub follow_activity_id: String,
    pub approve_status: ApproveStatus,
}

// =============================================================================
// Mentions
// =============================================================================

/// An inbound note addressed to one of our accounts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mention {
    pub note_id: String,
    pub actor_url: String,
    pub content: String,
    pub received_at: DateTime<Utc>,
}
