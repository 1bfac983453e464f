//! Peer protocol message types for chainwatch.

use chainwatch_types::{Block, BlockHash, BlockHeader, InventoryItem, Transaction, TxHash};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Version announcement sent first on every connection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionMessage {
    pub magic: [u8; 4],
    pub protocol_version: u32,
    pub user_agent: String,
    pub start_height: u64,
    pub nonce: u64,
}

/// Ask for headers following the first known hash in `locator`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetHeadersMessage {
    pub locator: Vec<BlockHash>,
    pub stop: BlockHash,
}

/// Rejection codes a peer attaches to a refused message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RejectCode {
    Malformed,
    Invalid,
    Obsolete,
    /// The network already knows the transaction.
    Duplicate,
    NonStandard,
    Dust,
    InsufficientFee,
    Checkpoint,
    Other,
}

impl RejectCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Malformed => "MALFORMED",
            Self::Invalid => "INVALID",
            Self::Obsolete => "OBSOLETE",
            Self::Duplicate => "DUPLICATE",
            Self::NonStandard => "NONSTANDARD",
            Self::Dust => "DUST",
            Self::InsufficientFee => "INSUFFICIENTFEE",
            Self::Checkpoint => "CHECKPOINT",
            Self::Other => "OTHER",
        }
    }
}

impl fmt::Display for RejectCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectMessage {
    /// Command of the rejected message, e.g. `"tx"`.
    pub message: String,
    pub code: RejectCode,
    pub reason: String,
    pub hash: Option<TxHash>,
}

/// Every message exchanged with a peer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerMessage {
    // Handshake
    Version(VersionMessage),
    Verack,

    // Liveness
    Ping(u64),
    Pong(u64),

    // Inventory
    Inv(Vec<InventoryItem>),
    GetData(Vec<InventoryItem>),
    Tx(Transaction),
    Block(Block),
    Reject(RejectMessage),

    // Header sync
    GetHeaders(GetHeadersMessage),
    Headers(Vec<BlockHeader>),
}

impl PeerMessage {
    /// Short command name, used in logs and metrics labels.
    pub fn command(&self) -> &'static str {
        match self {
            Self::Version(_) => "version",
            Self::Verack => "verack",
            Self::Ping(_) => "ping",
            Self::Pong(_) => "pong",
            Self::Inv(_) => "inv",
            Self::GetData(_) => "getdata",
            Self::Tx(_) => "tx",
            Self::Block(_) => "block",
            Self::Reject(_) => "reject",
            Self::GetHeaders(_) => "getheaders",
            Self::Headers(_) => "headers",
        }
    }
}
