//! The broadcast registry: transactions we were asked to relay.
//!
//! Entries live in a sharded concurrent map keyed by transaction hash, so
//! the feed consumer, the relay dispatcher and reject handling can race on
//! the same hash without a global lock. Each entry remembers the key of the
//! persisted request it came from; removing the entry also deletes that
//! record from the feed.

use std::sync::Arc;

use chainwatch_store::{BroadcastRequest, ChangeFeed};
use chainwatch_types::{Timestamp, Transaction, TxHash};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, error, info};

use crate::ListenerMetrics;

/// A transaction waiting to be picked up by the relay peer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrackedTransaction {
    pub hash: TxHash,
    pub transaction: Arc<Transaction>,
    pub first_seen: Timestamp,
    /// Key of the persisted broadcast request.
    pub record_key: String,
}

pub struct BroadcastRegistry {
    entries: DashMap<TxHash, TrackedTransaction>,
    feed: Arc<dyn ChangeFeed<BroadcastRequest>>,
    ttl_secs: u64,
    metrics: Arc<ListenerMetrics>,
}

impl BroadcastRegistry {
    pub fn new(
        feed: Arc<dyn ChangeFeed<BroadcastRequest>>,
        ttl_secs: u64,
        metrics: Arc<ListenerMetrics>,
    ) -> Self {
        Self {
            entries: DashMap::new(),
            feed,
            ttl_secs,
            metrics,
        }
    }

    /// Track `transaction` unless its hash is already tracked.
    ///
    /// Returns the entry now in the registry and whether this call inserted
    /// it. Of any number of concurrent callers for one hash, exactly one sees
    /// `true`.
    pub fn get_or_add(
        &self,
        hash: TxHash,
        transaction: Transaction,
        record_key: &str,
        first_seen: Timestamp,
    ) -> (TrackedTransaction, bool) {
        let result = match self.entries.entry(hash) {
            Entry::Occupied(existing) => (existing.get().clone(), false),
            Entry::Vacant(slot) => {
                let entry = TrackedTransaction {
                    hash,
                    transaction: Arc::new(transaction),
                    first_seen,
                    record_key: record_key.to_string(),
                };
                slot.insert(entry.clone());
                (entry, true)
            }
        };
        if result.1 {
            self.metrics.tracked_transactions.set(self.entries.len() as i64);
        }
        result
    }

    pub fn contains(&self, hash: &TxHash) -> bool {
        self.entries.contains_key(hash)
    }

    pub fn get(&self, hash: &TxHash) -> Option<TrackedTransaction> {
        self.entries.get(hash).map(|e| e.value().clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Stop tracking `hash` and hand back its entry. Only one caller can get
    /// a given entry. The persisted record is deleted as well.
    pub fn take(&self, hash: &TxHash) -> Option<TrackedTransaction> {
        let entry = self.detach(hash)?;
        self.delete_record(&entry.record_key);
        Some(entry)
    }

    /// Like [`take`](Self::take), but the persisted record is left alone.
    /// The caller either deletes it or hands the entry back with
    /// [`restore`](Self::restore).
    pub fn detach(&self, hash: &TxHash) -> Option<TrackedTransaction> {
        let (_, entry) = self.entries.remove(hash)?;
        self.metrics.tracked_transactions.set(self.entries.len() as i64);
        Some(entry)
    }

    /// Put back an entry obtained from [`detach`](Self::detach). Returns false
    /// if the hash was tracked again in the meantime; that entry wins.
    pub fn restore(&self, entry: TrackedTransaction) -> bool {
        let inserted = match self.entries.entry(entry.hash) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(entry);
                true
            }
        };
        if inserted {
            self.metrics.tracked_transactions.set(self.entries.len() as i64);
        }
        inserted
    }

    /// Stop tracking `hash`. Returns false if it was not tracked.
    pub fn remove(&self, hash: &TxHash) -> bool {
        self.take(hash).is_some()
    }

    /// Delete a persisted broadcast request. Never fails: a record that is
    /// already gone counts as deleted, other errors are logged.
    pub fn delete_record(&self, key: &str) {
        match self.feed.delete(key) {
            Ok(()) => debug!(key, "broadcast record deleted"),
            Err(e) if e.is_not_found() => debug!(key, "broadcast record already gone"),
            Err(e) => error!(key, error = %e, "failed to delete broadcast record"),
        }
    }

    /// Apply the expiry policy to a feed event whose record was written at
    /// `timestamp`. `hash` is `None` when the record could not be decoded.
    ///
    /// Returns true if the record was expired.
    pub fn check_expiry(
        &self,
        record_key: &str,
        timestamp: Timestamp,
        hash: Option<&TxHash>,
        now: Timestamp,
    ) -> bool {
        if !timestamp.is_older_than(self.ttl_secs, now) {
            return false;
        }
        info!(
            key = record_key,
            age_secs = timestamp.elapsed_since(now),
            "broadcast request expired"
        );
        let removed_key = hash.and_then(|h| self.take(h)).map(|e| e.record_key);
        if removed_key.as_deref() != Some(record_key) {
            self.delete_record(record_key);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainwatch_nullables::MemoryFeed;

    const DAY: u64 = 24 * 60 * 60;

    fn tx(n: u32) -> Transaction {
        Transaction {
            version: 1,
            inputs: Vec::new(),
            outputs: Vec::new(),
            lock_time: n,
        }
    }

    fn registry() -> (Arc<MemoryFeed<BroadcastRequest>>, BroadcastRegistry) {
        let feed = Arc::new(MemoryFeed::new("broadcasts"));
        let metrics = Arc::new(ListenerMetrics::new().expect("metrics"));
        let registry = BroadcastRegistry::new(feed.clone(), DAY, metrics);
        (feed, registry)
    }

    #[test]
    fn second_add_returns_existing_entry() {
        let (_, registry) = registry();
        let t = tx(1);
        let (first, inserted) = registry.get_or_add(t.hash(), t.clone(), "k1", Timestamp::new(10));
        assert!(inserted);
        let (again, inserted) = registry.get_or_add(t.hash(), t.clone(), "k2", Timestamp::new(20));
        assert!(!inserted);
        assert_eq!(again, first);
        assert_eq!(again.record_key, "k1");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn exactly_one_concurrent_caller_inserts() {
        let (_, registry) = registry();
        let t = tx(7);
        let hash = t.hash();
        let inserted: usize = std::thread::scope(|s| {
            let handles: Vec<_> = (0..16)
                .map(|i| {
                    let registry = &registry;
                    let t = t.clone();
                    s.spawn(move || {
                        let key = format!("k{i}");
                        registry.get_or_add(hash, t, &key, Timestamp::new(1)).1 as usize
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().expect("thread")).sum()
        });
        assert_eq!(inserted, 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn take_hands_out_an_entry_once_and_deletes_its_record() {
        let (feed, registry) = registry();
        let t = tx(2);
        feed.add("k", Timestamp::new(1), BroadcastRequest::new(&t));
        registry.get_or_add(t.hash(), t.clone(), "k", Timestamp::new(1));

        assert!(registry.take(&t.hash()).is_some());
        assert!(registry.take(&t.hash()).is_none());
        assert!(!feed.contains("k"));
    }

    #[test]
    fn detached_entry_keeps_its_record_and_can_be_restored() {
        let (feed, registry) = registry();
        let t = tx(5);
        feed.add("k", Timestamp::new(1), BroadcastRequest::new(&t));
        registry.get_or_add(t.hash(), t.clone(), "k", Timestamp::new(1));

        let entry = registry.detach(&t.hash()).expect("tracked");
        assert!(!registry.contains(&t.hash()));
        assert!(feed.contains("k"));

        assert!(registry.restore(entry.clone()));
        assert_eq!(registry.get(&t.hash()), Some(entry.clone()));
        assert!(!registry.restore(entry));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn remove_tolerates_missing_record() {
        let (feed, registry) = registry();
        let t = tx(3);
        registry.get_or_add(t.hash(), t.clone(), "never-persisted", Timestamp::new(1));
        assert!(registry.remove(&t.hash()));
        assert!(feed.deleted_keys().is_empty());
        assert!(!registry.remove(&t.hash()));
    }

    #[test]
    fn remove_survives_backend_failure() {
        let (feed, registry) = registry();
        let t = tx(4);
        feed.add("k", Timestamp::new(1), BroadcastRequest::new(&t));
        feed.fail_deletes("disk full");
        registry.get_or_add(t.hash(), t.clone(), "k", Timestamp::new(1));

        assert!(registry.remove(&t.hash()));
        assert!(!registry.contains(&t.hash()));
        assert!(feed.contains("k"));
    }

    #[test]
    fn fresh_records_are_kept() {
        let (_, registry) = registry();
        let t = tx(5);
        let now = Timestamp::new(10 * DAY);
        registry.get_or_add(t.hash(), t.clone(), "k", now);
        assert!(!registry.check_expiry("k", now.minus_secs(DAY), Some(&t.hash()), now));
        assert!(registry.contains(&t.hash()));
    }

    #[test]
    fn records_older_than_a_day_are_removed() {
        let (feed, registry) = registry();
        let t = tx(6);
        let now = Timestamp::new(10 * DAY);
        let written = now.minus_secs(30 * 60 * 60);
        feed.add("k", written, BroadcastRequest::new(&t));
        registry.get_or_add(t.hash(), t.clone(), "k", now);

        assert!(registry.check_expiry("k", written, Some(&t.hash()), now));
        assert!(!registry.contains(&t.hash()));
        assert_eq!(feed.deleted_keys(), vec!["k".to_string()]);
    }

    #[test]
    fn expired_duplicate_record_is_deleted_by_its_own_key() {
        let (feed, registry) = registry();
        let t = tx(8);
        let now = Timestamp::new(10 * DAY);
        let written = now.minus_secs(2 * DAY);
        feed.add("first", written, BroadcastRequest::new(&t));
        feed.add("second", written, BroadcastRequest::new(&t));
        registry.get_or_add(t.hash(), t.clone(), "first", now);

        registry.check_expiry("second", written, Some(&t.hash()), now);
        assert!(feed.is_empty());
    }

    #[test]
    fn undecodable_expired_record_is_deleted_by_key() {
        let (feed, registry) = registry();
        let now = Timestamp::new(10 * DAY);
        let written = now.minus_secs(2 * DAY);
        feed.add(
            "garbage",
            written,
            BroadcastRequest {
                raw_transaction: vec![1, 2, 3],
            },
        );

        assert!(registry.check_expiry("garbage", written, None, now));
        assert!(!feed.contains("garbage"));
    }
}
