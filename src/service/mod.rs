//! Service layer
//!
//! Feed ingestion, outbound notes and the outward views of local accounts.
//! HTTP handlers and the inbox call into these; they never talk to the
//! network or the database directly.

pub mod clock;
pub mod directory;
pub mod feed_follower;
pub mod feed_source;
pub mod messenger;
pub mod texts;

pub use directory::Directory;
pub use feed_follower::{CheckOutcome, FeedIngestor, FeedStatus};
pub use feed_source::{DomainBlockList, HttpPageFetcher, PageFetcher};
pub use messenger::Messenger;
pub use texts::{BuiltinTexts, Texts};
