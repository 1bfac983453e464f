//! Append-only change feeds.
//!
//! A feed delivers one event per change to a persisted table. Consumers
//! read events from a [`FeedSubscription`] channel instead of registering a
//! callback, so the delivering side never waits on downstream work.

use chainwatch_types::Timestamp;
use tokio::sync::mpsc;

use crate::StoreError;

/// Snapshot of a persisted record at the time of the change.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FeedRecord<T> {
    /// Storage key of the record, used to delete it later.
    pub key: String,
    /// When the record was written.
    pub timestamp: Timestamp,
    pub value: T,
}

/// A single change delivered by a feed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FeedEvent<T> {
    Added(FeedRecord<T>),
    Deleted { key: String },
}

impl<T> FeedEvent<T> {
    pub fn is_addition(&self) -> bool {
        matches!(self, Self::Added(_))
    }

    /// The added record, if this is an addition.
    pub fn added(&self) -> Option<&FeedRecord<T>> {
        match self {
            Self::Added(record) => Some(record),
            Self::Deleted { .. } => None,
        }
    }
}

/// A live subscription to a feed.
///
/// Dropping or [`dispose`](Self::dispose)-ing the subscription detaches it
/// from the feed; no further events are delivered.
pub struct FeedSubscription<T> {
    events: mpsc::UnboundedReceiver<FeedEvent<T>>,
    on_dispose: Option<Box<dyn FnOnce() + Send>>,
}

impl<T> FeedSubscription<T> {
    pub fn new(
        events: mpsc::UnboundedReceiver<FeedEvent<T>>,
        on_dispose: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            events,
            on_dispose: Some(Box::new(on_dispose)),
        }
    }

    /// Wait for the next event. `None` once the subscription is disposed or
    /// the feed shuts down.
    pub async fn next(&mut self) -> Option<FeedEvent<T>> {
        self.events.recv().await
    }

    pub fn dispose(&mut self) {
        if let Some(detach) = self.on_dispose.take() {
            detach();
        }
        self.events.close();
    }

    pub fn is_disposed(&self) -> bool {
        self.on_dispose.is_none()
    }
}

impl<T> std::fmt::Debug for FeedSubscription<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedSubscription")
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}

impl<T> Drop for FeedSubscription<T> {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// An external append-only table that announces its changes.
pub trait ChangeFeed<T>: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Create the backing table if it does not exist yet.
    fn ensure_exists(&self) -> Result<(), StoreError>;

    /// Start receiving change events. Records already present are delivered
    /// first as additions.
    fn subscribe(&self) -> Result<FeedSubscription<T>, StoreError>;

    /// Delete a persisted record. Returns [`StoreError::NotFound`] when the
    /// record is already gone.
    fn delete(&self, key: &str) -> Result<(), StoreError>;
}
