//! Peer networking for the chainwatch listener.
//!
//! Handles TCP framing, the version handshake, automatic replies to
//! liveness probes and header-chain synchronization over a single peer
//! connection. Which peers to use and what to do with their traffic is
//! decided by the node crate.

pub mod codec;
pub mod connector;
pub mod error;
pub mod peer;
pub mod wire;

pub use connector::{PeerConnector, TcpConnector};
pub use error::NetworkError;
pub use peer::{next_nonce, Peer, PeerRole, PROTOCOL_VERSION};
pub use wire::Wire;
