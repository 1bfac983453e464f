//! Storage-facing seams for the chainwatch listener.
//!
//! The listener never talks to a storage engine directly. Change feeds,
//! persisted broadcast records and the indexing pipeline are reached
//! through the traits in this crate; the rest of the workspace depends only
//! on them.

pub mod broadcast;
pub mod error;
pub mod feed;
pub mod indexer;

pub use broadcast::BroadcastRequest;
pub use error::StoreError;
pub use feed::{ChangeFeed, FeedEvent, FeedRecord, FeedSubscription};
pub use indexer::Indexer;
