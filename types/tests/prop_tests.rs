use proptest::prelude::*;

use chainwatch_types::{
    BlockHash, BlockHeader, InventoryItem, NetworkId, Timestamp, Transaction, TxHash, TxOutput,
};

fn arb_transaction() -> impl Strategy<Value = Transaction> {
    (
        any::<u32>(),
        prop::collection::vec((any::<u64>(), prop::collection::vec(any::<u8>(), 0..40)), 0..6),
        any::<u32>(),
    )
        .prop_map(|(version, outputs, lock_time)| Transaction {
            version,
            inputs: Vec::new(),
            outputs: outputs
                .into_iter()
                .map(|(value, script_pubkey)| TxOutput {
                    value,
                    script_pubkey,
                })
                .collect(),
            lock_time,
        })
}

proptest! {
    /// The hex form of a hash always parses back to the same hash.
    #[test]
    fn tx_hash_hex_parses_back(bytes in prop::array::uniform32(0u8..)) {
        let hash = TxHash::new(bytes);
        prop_assert_eq!(TxHash::from_hex(&hash.to_string()).ok(), Some(hash));
    }

    /// Anything that is not 64 hex digits is refused.
    #[test]
    fn block_hash_rejects_wrong_length(s in "[0-9a-f]{0,63}") {
        prop_assert!(BlockHash::from_hex(&s).is_err());
    }

    /// A transaction's hash is a function of its canonical bytes.
    #[test]
    fn transaction_hash_survives_reencoding(tx in arb_transaction()) {
        let decoded = Transaction::from_bytes(&tx.to_bytes()).unwrap();
        prop_assert_eq!(decoded.hash(), tx.hash());
        prop_assert_eq!(decoded, tx);
    }

    /// Transactions differing only in lock time never share a hash.
    #[test]
    fn lock_time_changes_the_hash(tx in arb_transaction(), bump in 1u32..) {
        let mut other = tx.clone();
        other.lock_time = tx.lock_time.wrapping_add(bump);
        prop_assert_ne!(other.hash(), tx.hash());
    }

    /// Truncated encodings never decode.
    #[test]
    fn truncated_transaction_is_refused(tx in arb_transaction(), cut in 1usize..8) {
        let bytes = tx.to_bytes();
        let keep = bytes.len().saturating_sub(cut);
        prop_assert!(Transaction::from_bytes(&bytes[..keep]).is_err());
    }

    /// Timestamp elapsed_since saturates at zero for future timestamps.
    #[test]
    fn elapsed_since_saturates(base in 0u64..1_000_000, offset in 0u64..1_000_000) {
        let t = Timestamp::new(base);
        prop_assert_eq!(t.elapsed_since(Timestamp::new(base + offset)), offset);
        prop_assert_eq!(Timestamp::new(base + offset + 1).elapsed_since(t), 0);
    }

    /// is_older_than is strict: exactly `duration` old is not older.
    #[test]
    fn is_older_than_is_strict(start in 0u64..500_000, duration in 0u64..500_000, offset in 0u64..1_000_000) {
        let t = Timestamp::new(start);
        let now = Timestamp::new(start + offset);
        prop_assert_eq!(t.is_older_than(duration, now), offset > duration);
    }

    /// minus_secs is the inverse of elapsed time, saturating at the epoch.
    #[test]
    fn minus_secs_moves_into_the_past(now in 0u64..1_000_000, secs in 0u64..2_000_000) {
        let now = Timestamp::new(now);
        let past = now.minus_secs(secs);
        prop_assert_eq!(past.elapsed_since(now), secs.min(now.as_secs()));
    }

    /// child_of always links to the parent, whatever the nonce.
    #[test]
    fn child_links_to_parent(nonce in any::<u32>()) {
        let genesis = NetworkId::Regtest.genesis_header();
        let child = BlockHeader::child_of(&genesis, nonce);
        prop_assert_eq!(child.prev_block, genesis.hash());
        prop_assert_ne!(child.hash(), genesis.hash());
    }

    /// Only transaction inventory yields a transaction hash.
    #[test]
    fn inventory_tx_hash(bytes in prop::array::uniform32(0u8..)) {
        prop_assert_eq!(InventoryItem::Tx(TxHash::new(bytes)).tx_hash(), Some(TxHash::new(bytes)));
        prop_assert_eq!(InventoryItem::Block(BlockHash::new(bytes)).tx_hash(), None);
    }
}
