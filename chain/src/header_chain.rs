//! The header chain and its index.

use std::collections::HashMap;

use chainwatch_types::{BlockHash, BlockHeader};
use parking_lot::RwLock;

use crate::ChainError;

/// Largest number of headers a peer returns for one `GetHeaders`.
pub const MAX_HEADERS_PER_MESSAGE: usize = 2000;

/// Number of most recent headers listed one by one in a locator before the
/// step starts doubling.
const DENSE_LOCATOR_LEN: usize = 10;

/// A header together with its position in the chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChainedHeader {
    pub header: BlockHeader,
    pub hash: BlockHash,
    pub height: u64,
}

/// Result of [`HeaderChain::connect`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConnectOutcome {
    /// Headers newly added to the chain.
    pub connected: usize,
    /// Height of the last common ancestor if the tip switched branches.
    pub reorg_from: Option<u64>,
}

struct ChainIndex {
    by_height: Vec<ChainedHeader>,
    by_hash: HashMap<BlockHash, u64>,
}

impl ChainIndex {
    fn tip(&self) -> &ChainedHeader {
        // `by_height` always holds at least the genesis header.
        &self.by_height[self.by_height.len() - 1]
    }

    fn truncate_above(&mut self, height: u64) {
        let keep = (height + 1) as usize;
        for removed in self.by_height.drain(keep..) {
            self.by_hash.remove(&removed.hash);
        }
    }

    fn push(&mut self, header: BlockHeader) {
        let height = self.by_height.len() as u64;
        let hash = header.hash();
        self.by_hash.insert(hash, height);
        self.by_height.push(ChainedHeader {
            header,
            hash,
            height,
        });
    }
}

/// An in-memory chain of headers from genesis to tip.
///
/// All access goes through an internal reader/writer lock, so the chain can
/// be shared behind an `Arc`. Only one task is expected to call
/// [`connect`](Self::connect) at a time.
pub struct HeaderChain {
    index: RwLock<ChainIndex>,
}

impl HeaderChain {
    pub fn new(genesis: BlockHeader) -> Self {
        let mut index = ChainIndex {
            by_height: Vec::new(),
            by_hash: HashMap::new(),
        };
        index.push(genesis);
        Self {
            index: RwLock::new(index),
        }
    }

    pub fn tip(&self) -> ChainedHeader {
        self.index.read().tip().clone()
    }

    pub fn height(&self) -> u64 {
        self.index.read().tip().height
    }

    pub fn genesis(&self) -> ChainedHeader {
        self.index.read().by_height[0].clone()
    }

    pub fn contains(&self, hash: &BlockHash) -> bool {
        self.index.read().by_hash.contains_key(hash)
    }

    pub fn get_by_hash(&self, hash: &BlockHash) -> Option<ChainedHeader> {
        let index = self.index.read();
        let height = *index.by_hash.get(hash)?;
        index.by_height.get(height as usize).cloned()
    }

    pub fn get_by_height(&self, height: u64) -> Option<ChainedHeader> {
        self.index.read().by_height.get(height as usize).cloned()
    }

    /// Block locator: the last ten hashes, then exponentially sparser ones,
    /// always ending with genesis.
    pub fn locator(&self) -> Vec<BlockHash> {
        let index = self.index.read();
        let tip = index.tip().height;
        let mut hashes = Vec::new();
        let mut height = tip;
        let mut step = 1u64;
        loop {
            hashes.push(index.by_height[height as usize].hash);
            if height == 0 {
                break;
            }
            if hashes.len() >= DENSE_LOCATOR_LEN {
                step *= 2;
            }
            height = height.saturating_sub(step);
        }
        hashes
    }

    /// Headers following the first locator hash found in this chain, up to
    /// `max`. An unknown locator starts right after genesis.
    pub fn headers_after(&self, locator: &[BlockHash], max: usize) -> Vec<BlockHeader> {
        let index = self.index.read();
        let start = locator
            .iter()
            .find_map(|h| index.by_hash.get(h))
            .map(|h| h + 1)
            .unwrap_or(1) as usize;
        index
            .by_height
            .iter()
            .skip(start)
            .take(max)
            .map(|c| c.header.clone())
            .collect()
    }

    /// Connect `headers`, given in parent-first order.
    ///
    /// Headers already in the chain are skipped. A header whose parent is in
    /// the chain but is not the tip switches the tip to the new branch,
    /// dropping everything above the fork point. Headers before the first
    /// unknown parent stay connected when an error is returned.
    pub fn connect(&self, headers: &[BlockHeader]) -> Result<ConnectOutcome, ChainError> {
        let mut index = self.index.write();
        let mut outcome = ConnectOutcome::default();
        for header in headers {
            let hash = header.hash();
            if index.by_hash.contains_key(&hash) {
                continue;
            }
            let parent_height = match index.by_hash.get(&header.prev_block) {
                Some(h) => *h,
                None => {
                    return Err(ChainError::UnknownParent {
                        hash,
                        parent: header.prev_block,
                    })
                }
            };
            if parent_height != index.tip().height {
                tracing::info!(
                    fork_height = parent_height,
                    old_tip = index.tip().height,
                    "header chain reorganisation"
                );
                index.truncate_above(parent_height);
                outcome.reorg_from.get_or_insert(parent_height);
            }
            index.push(header.clone());
            outcome.connected += 1;
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn genesis() -> BlockHeader {
        chainwatch_types::NetworkId::Regtest.genesis_header()
    }

    fn extend(from: &BlockHeader, count: usize, nonce_base: u32) -> Vec<BlockHeader> {
        let mut out = Vec::with_capacity(count);
        let mut prev = from.clone();
        for i in 0..count {
            let next = BlockHeader::child_of(&prev, nonce_base + i as u32);
            out.push(next.clone());
            prev = next;
        }
        out
    }

    #[test]
    fn new_chain_holds_only_genesis() {
        let chain = HeaderChain::new(genesis());
        assert_eq!(chain.height(), 0);
        assert_eq!(chain.tip().hash, genesis().hash());
        assert_eq!(chain.locator(), vec![genesis().hash()]);
    }

    #[test]
    fn connect_linear_headers() {
        let chain = HeaderChain::new(genesis());
        let headers = extend(&genesis(), 5, 0);
        let outcome = chain.connect(&headers).expect("connects");
        assert_eq!(outcome.connected, 5);
        assert_eq!(outcome.reorg_from, None);
        assert_eq!(chain.height(), 5);
        let third = chain.get_by_hash(&headers[2].hash()).expect("indexed");
        assert_eq!(third.height, 3);
        assert_eq!(chain.get_by_height(3).map(|c| c.hash), Some(headers[2].hash()));
    }

    #[test]
    fn reconnecting_known_headers_is_a_noop() {
        let chain = HeaderChain::new(genesis());
        let headers = extend(&genesis(), 3, 0);
        chain.connect(&headers).expect("connects");
        let outcome = chain.connect(&headers).expect("connects again");
        assert_eq!(outcome.connected, 0);
        assert_eq!(chain.height(), 3);
    }

    #[test]
    fn unknown_parent_is_rejected() {
        let chain = HeaderChain::new(genesis());
        let headers = extend(&genesis(), 3, 0);
        let err = chain.connect(&headers[1..]).unwrap_err();
        assert!(matches!(err, ChainError::UnknownParent { .. }));
        assert_eq!(chain.height(), 0);
    }

    #[test]
    fn fork_switches_tip_and_drops_stale_branch() {
        let chain = HeaderChain::new(genesis());
        let main = extend(&genesis(), 4, 0);
        chain.connect(&main).expect("connects");

        let fork = extend(&main[1], 3, 100);
        let outcome = chain.connect(&fork).expect("connects fork");
        assert_eq!(outcome.reorg_from, Some(2));
        assert_eq!(outcome.connected, 3);
        assert_eq!(chain.height(), 5);
        assert!(!chain.contains(&main[3].hash()));
        assert!(chain.contains(&main[1].hash()));
        assert_eq!(chain.tip().hash, fork[2].hash());
    }

    #[test]
    fn headers_after_starts_past_the_locator() {
        let chain = HeaderChain::new(genesis());
        let headers = extend(&genesis(), 10, 0);
        chain.connect(&headers).expect("connects");

        let after = chain.headers_after(&[headers[6].hash()], MAX_HEADERS_PER_MESSAGE);
        assert_eq!(after, headers[7..].to_vec());

        let limited = chain.headers_after(&[BlockHash::new([9; 32])], 2);
        assert_eq!(limited, headers[..2].to_vec());
    }

    proptest! {
        #[test]
        fn locator_runs_from_tip_to_genesis(len in 0usize..300) {
            let chain = HeaderChain::new(genesis());
            chain.connect(&extend(&genesis(), len, 0)).expect("connects");
            let locator = chain.locator();
            prop_assert_eq!(locator[0], chain.tip().hash);
            prop_assert_eq!(*locator.last().expect("non-empty"), genesis().hash());
            let mut heights: Vec<u64> = locator
                .iter()
                .map(|h| chain.get_by_hash(h).expect("in chain").height)
                .collect();
            let sorted = {
                let mut s = heights.clone();
                s.sort_unstable_by(|a, b| b.cmp(a));
                s.dedup();
                s
            };
            heights.dedup();
            prop_assert_eq!(heights, sorted);
        }

        #[test]
        fn synced_copy_matches_source(len in 1usize..200, split in 0usize..200) {
            let source = HeaderChain::new(genesis());
            source.connect(&extend(&genesis(), len, 0)).expect("connects");

            let copy = HeaderChain::new(genesis());
            let first = source.headers_after(&copy.locator(), split.min(len));
            copy.connect(&first).expect("connects first batch");
            let rest = source.headers_after(&copy.locator(), MAX_HEADERS_PER_MESSAGE);
            copy.connect(&rest).expect("connects rest");

            prop_assert_eq!(copy.tip(), source.tip());
        }
    }
}
