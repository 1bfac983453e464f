//! Pre-built [`tracing::Span`] constructors for common listener operations.
//!
//! Consistent span names and field sets make it easy to filter and
//! correlate logs from the two lanes and the two peers.

use tracing::{info_span, Span};

use crate::Lane;

/// Span covering one scheduled unit of work.
pub fn task_span(name: &str, lane: Lane) -> Span {
    info_span!("task", name = %name, lane = %lane)
}

/// Span covering the handling of a single inbound peer message.
pub fn peer_message_span(peer: &str, command: &str) -> Span {
    info_span!("peer_recv", peer = %peer, command = %command)
}

/// Span covering one change-feed event.
pub fn feed_event_span(feed: &str, key: &str) -> Span {
    info_span!("feed_event", feed = %feed, key = %key)
}
