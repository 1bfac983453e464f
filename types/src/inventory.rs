//! Inventory items advertised through `Inv` and requested through `GetData`.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{BlockHash, TxHash};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InventoryItem {
    Tx(TxHash),
    Block(BlockHash),
}

impl InventoryItem {
    /// The transaction hash, if this item names a transaction.
    pub fn tx_hash(&self) -> Option<TxHash> {
        match self {
            Self::Tx(hash) => Some(*hash),
            Self::Block(_) => None,
        }
    }
}

impl fmt::Display for InventoryItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tx(h) => write!(f, "tx {h}"),
            Self::Block(h) => write!(f, "block {h}"),
        }
    }
}
