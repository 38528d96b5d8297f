//! ActivityPub federation module
//!
//! Handles:
//! - URL minting for local actors and objects
//! - Wire documents (actors, collections, activities)
//! - HTTP Signatures, inbound and outbound
//! - Keys of local accounts
//! - Remote actor fetching and caching
//! - Vetting of outbound URLs
//! - Inbox dispatch
//! - WebFinger

pub mod actor_cache;
pub mod dto;
pub mod ids;
pub mod inbox;
pub mod key_store;
pub mod sender;
pub mod sig_checker;
pub mod signature;
pub mod url_guard;
pub mod webfinger;

pub use actor_cache::{ActorFetcher, ActorInfo, CachingActorFetcher, HttpActorFetcher};
pub use ids::IdBuilder;
pub use inbox::{InboxOutcome, InboxProcessor};
pub use key_store::KeyStore;
pub use sender::{ActivitySender, HttpActivitySender};
pub use sig_checker::{SignatureCheck, SignatureChecker};
pub use webfinger::{WebFingerResponse, generate_webfinger_response, parse_acct_resource};
