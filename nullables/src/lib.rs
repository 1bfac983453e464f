//! Nullable infrastructure for deterministic testing.
//!
//! Every external collaborator of the listener (remote peers, change feeds,
//! the indexer) has an in-process stand-in here that:
//! - Never touches the filesystem or network
//! - Can be driven programmatically
//! - Records what it was asked to do, for assertions
//!
//! Usage: hand these to the listener in place of the real implementations.

pub mod network;
pub mod store;

pub use network::{NullConnector, NullPeer};
pub use store::{IndexCall, MemoryFeed, NullIndexer};
