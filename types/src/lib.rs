//! Fundamental types for the chainwatch listener.
//!
//! This crate defines the types shared across every other crate in the
//! workspace: hashes, timestamps, headers, blocks, transactions, inventory
//! items and wallet watch rules.

pub mod block;
pub mod error;
pub mod hash;
pub mod inventory;
pub mod network;
pub mod time;
pub mod transaction;
pub mod wallet;

pub use block::{Block, BlockHeader};
pub use error::DecodeError;
pub use hash::{blake2b_256, BlockHash, TxHash};
pub use inventory::InventoryItem;
pub use network::NetworkId;
pub use time::Timestamp;
pub use transaction::{OutPoint, Transaction, TxInput, TxOutput};
pub use wallet::{WalletBalanceChange, WalletRule};
