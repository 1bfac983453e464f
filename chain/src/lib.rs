//! Header chain tracking for the listener.
//!
//! The chain is written by a single owner (header synchronization) and read
//! from anywhere. Readers always observe a consistent, possibly stale, view.

pub mod error;
pub mod header_chain;

pub use error::ChainError;
pub use header_chain::{ChainedHeader, ConnectOutcome, HeaderChain, MAX_HEADERS_PER_MESSAGE};
