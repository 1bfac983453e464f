//! Block headers and full blocks.

use serde::{Deserialize, Serialize};

use crate::{blake2b_256, BlockHash, Transaction};

/// A block header. Headers are linked through `prev_block`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub version: u32,
    pub prev_block: BlockHash,
    pub merkle_root: [u8; 32],
    pub time: u32,
    pub bits: u32,
    pub nonce: u32,
}

impl BlockHeader {
    pub fn hash(&self) -> BlockHash {
        let bytes = bincode::serialize(self).unwrap_or_default();
        BlockHash::new(blake2b_256(&bytes))
    }

    /// Build a header extending `prev`, with `nonce` used to make siblings distinct.
    pub fn child_of(prev: &BlockHeader, nonce: u32) -> Self {
        Self {
            version: prev.version,
            prev_block: prev.hash(),
            merkle_root: [0u8; 32],
            time: prev.time.saturating_add(600),
            bits: prev.bits,
            nonce,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// The block is identified by its header hash.
    pub fn hash(&self) -> BlockHash {
        self.header.hash()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn genesis() -> BlockHeader {
        BlockHeader {
            version: 1,
            prev_block: BlockHash::ZERO,
            merkle_root: [0u8; 32],
            time: 1_231_006_505,
            bits: 0x1d00ffff,
            nonce: 0,
        }
    }

    #[test]
    fn child_links_to_parent() {
        let g = genesis();
        let child = BlockHeader::child_of(&g, 1);
        assert_eq!(child.prev_block, g.hash());
        assert_ne!(child.hash(), g.hash());
    }

    #[test]
    fn siblings_differ_by_nonce() {
        let g = genesis();
        assert_ne!(
            BlockHeader::child_of(&g, 1).hash(),
            BlockHeader::child_of(&g, 2).hash()
        );
    }

    #[test]
    fn block_hash_is_header_hash() {
        let block = Block {
            header: genesis(),
            transactions: Vec::new(),
        };
        assert_eq!(block.hash(), genesis().hash());
    }
}
