//! Nullable store: in-memory change feeds and a recording indexer.

use std::collections::HashMap;
use std::sync::Arc;

use chainwatch_chain::HeaderChain;
use chainwatch_store::{ChangeFeed, FeedEvent, FeedRecord, FeedSubscription, Indexer, StoreError};
use chainwatch_types::{Block, BlockHash, Timestamp, Transaction, TxHash, WalletBalanceChange, WalletRule};
use parking_lot::Mutex;
use tokio::sync::mpsc;

struct FeedState<T> {
    exists: bool,
    records: Vec<FeedRecord<T>>,
    subscribers: HashMap<u64, mpsc::UnboundedSender<FeedEvent<T>>>,
    next_subscriber: u64,
    deleted: Vec<String>,
    delete_failure: Option<String>,
}

/// A change feed backed by a vector.
///
/// Records are kept in insertion order. New subscribers first receive every
/// stored record as an addition, then live changes.
pub struct MemoryFeed<T> {
    name: String,
    state: Arc<Mutex<FeedState<T>>>,
}

impl<T: Clone + Send + 'static> MemoryFeed<T> {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: Arc::new(Mutex::new(FeedState {
                exists: false,
                records: Vec::new(),
                subscribers: HashMap::new(),
                next_subscriber: 0,
                deleted: Vec::new(),
                delete_failure: None,
            })),
        }
    }

    /// Persist a record and announce it to every subscriber.
    pub fn add(&self, key: &str, timestamp: Timestamp, value: T) {
        let record = FeedRecord {
            key: key.to_string(),
            timestamp,
            value,
        };
        let mut state = self.state.lock();
        state.records.push(record.clone());
        state
            .subscribers
            .retain(|_, tx| tx.send(FeedEvent::Added(record.clone())).is_ok());
    }

    pub fn add_now(&self, key: &str, value: T) {
        self.add(key, Timestamp::now(), value);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.state.lock().records.iter().any(|r| r.key == key)
    }

    pub fn len(&self) -> usize {
        self.state.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys removed through [`ChangeFeed::delete`], in order.
    pub fn deleted_keys(&self) -> Vec<String> {
        self.state.lock().deleted.clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.state.lock().subscribers.len()
    }

    pub fn exists(&self) -> bool {
        self.state.lock().exists
    }

    /// Make every following delete fail with a backend error.
    pub fn fail_deletes(&self, reason: &str) {
        self.state.lock().delete_failure = Some(reason.to_string());
    }
}

impl<T: Clone + Send + 'static> ChangeFeed<T> for MemoryFeed<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn ensure_exists(&self) -> Result<(), StoreError> {
        self.state.lock().exists = true;
        Ok(())
    }

    fn subscribe(&self) -> Result<FeedSubscription<T>, StoreError> {
        let mut state = self.state.lock();
        if !state.exists {
            return Err(StoreError::NotFound(format!("table {}", self.name)));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        for record in &state.records {
            let _ = tx.send(FeedEvent::Added(record.clone()));
        }
        let id = state.next_subscriber;
        state.next_subscriber += 1;
        state.subscribers.insert(id, tx);

        let weak = Arc::downgrade(&self.state);
        Ok(FeedSubscription::new(rx, move || {
            if let Some(state) = weak.upgrade() {
                state.lock().subscribers.remove(&id);
            }
        }))
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        if let Some(reason) = &state.delete_failure {
            return Err(StoreError::Backend(reason.clone()));
        }
        let position = state
            .records
            .iter()
            .position(|r| r.key == key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        state.records.remove(position);
        state.deleted.push(key.to_string());
        let event = FeedEvent::Deleted {
            key: key.to_string(),
        };
        state
            .subscribers
            .retain(|_, tx| tx.send(event.clone()).is_ok());
        Ok(())
    }
}

/// One call made to the [`NullIndexer`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IndexCall {
    Chain { height: u64 },
    Transaction(TxHash),
    OrderedBalance(TxHash),
    Block(BlockHash),
    Transactions { height: u64, block: BlockHash },
    BlockOrderedBalance { height: u64, block: BlockHash },
    WalletOrderedBalance { height: u64, block: BlockHash, rules: usize },
    WalletBalances { partition: String, changes: usize },
    WalletRules,
}

impl IndexCall {
    /// Name of the indexer method, for failure injection.
    pub fn method(&self) -> &'static str {
        match self {
            Self::Chain { .. } => "index_chain",
            Self::Transaction(_) => "index_transaction",
            Self::OrderedBalance(_) => "index_ordered_balance",
            Self::Block(_) => "index_block",
            Self::Transactions { .. } => "index_transactions",
            Self::BlockOrderedBalance { .. } => "index_block_ordered_balance",
            Self::WalletOrderedBalance { .. } => "index_wallet_ordered_balance",
            Self::WalletBalances { .. } => "index_wallet_balances",
            Self::WalletRules => "wallet_rules",
        }
    }
}

/// An indexer that only records its calls.
#[derive(Default)]
pub struct NullIndexer {
    calls: Mutex<Vec<IndexCall>>,
    rules: Mutex<Vec<WalletRule>>,
    failing: Mutex<HashMap<&'static str, String>>,
}

impl NullIndexer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rules returned by [`Indexer::wallet_rules`].
    pub fn with_rules(rules: Vec<WalletRule>) -> Self {
        let indexer = Self::new();
        *indexer.rules.lock() = rules;
        indexer
    }

    /// Make every call to `method` fail with a backend error.
    pub fn fail(&self, method: &'static str, reason: &str) {
        self.failing.lock().insert(method, reason.to_string());
    }

    pub fn calls(&self) -> Vec<IndexCall> {
        self.calls.lock().clone()
    }

    pub fn count(&self, pred: impl Fn(&IndexCall) -> bool) -> usize {
        self.calls.lock().iter().filter(|c| pred(c)).count()
    }

    fn record(&self, call: IndexCall) -> Result<(), StoreError> {
        let failure = self.failing.lock().get(call.method()).cloned();
        self.calls.lock().push(call);
        match failure {
            Some(reason) => Err(StoreError::Backend(reason)),
            None => Ok(()),
        }
    }
}

impl Indexer for NullIndexer {
    fn index_chain(&self, chain: &HeaderChain) -> Result<(), StoreError> {
        self.record(IndexCall::Chain {
            height: chain.height(),
        })
    }

    fn index_transaction(&self, hash: &TxHash, _tx: &Transaction) -> Result<(), StoreError> {
        self.record(IndexCall::Transaction(*hash))
    }

    fn index_ordered_balance(&self, tx: &Transaction) -> Result<(), StoreError> {
        self.record(IndexCall::OrderedBalance(tx.hash()))
    }

    fn index_block(&self, block: &Block) -> Result<(), StoreError> {
        self.record(IndexCall::Block(block.hash()))
    }

    fn index_transactions(&self, height: u64, block: &Block) -> Result<(), StoreError> {
        self.record(IndexCall::Transactions {
            height,
            block: block.hash(),
        })
    }

    fn index_block_ordered_balance(&self, height: u64, block: &Block) -> Result<(), StoreError> {
        self.record(IndexCall::BlockOrderedBalance {
            height,
            block: block.hash(),
        })
    }

    fn index_wallet_ordered_balance(
        &self,
        height: u64,
        block: &Block,
        rules: &[WalletRule],
    ) -> Result<(), StoreError> {
        self.record(IndexCall::WalletOrderedBalance {
            height,
            block: block.hash(),
            rules: rules.len(),
        })
    }

    fn index_wallet_balances(
        &self,
        partition_key: &str,
        changes: &[WalletBalanceChange],
    ) -> Result<(), StoreError> {
        self.record(IndexCall::WalletBalances {
            partition: partition_key.to_string(),
            changes: changes.len(),
        })
    }

    fn wallet_rules(&self) -> Result<Vec<WalletRule>, StoreError> {
        self.record(IndexCall::WalletRules)?;
        Ok(self.rules.lock().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_sees_backlog_then_live_records() {
        let feed = MemoryFeed::new("broadcasts");
        feed.add("a", Timestamp::new(1), 1u8);
        feed.ensure_exists().expect("create");
        let mut sub = feed.subscribe().expect("subscribe");
        feed.add("b", Timestamp::new(2), 2u8);

        let first = sub.next().await.expect("event");
        let second = sub.next().await.expect("event");
        assert_eq!(first.added().map(|r| r.key.as_str()), Some("a"));
        assert_eq!(second.added().map(|r| r.value), Some(2));
    }

    #[test]
    fn subscribe_requires_table() {
        let feed = MemoryFeed::<u8>::new("rules");
        assert!(feed.subscribe().unwrap_err().is_not_found());
    }

    #[test]
    fn delete_reports_missing_records() {
        let feed = MemoryFeed::new("broadcasts");
        feed.add("a", Timestamp::new(1), 1u8);
        feed.delete("a").expect("present");
        assert!(feed.delete("a").unwrap_err().is_not_found());
        assert_eq!(feed.deleted_keys(), vec!["a".to_string()]);
        assert!(feed.is_empty());
    }

    #[test]
    fn injected_delete_failure() {
        let feed = MemoryFeed::new("broadcasts");
        feed.add("a", Timestamp::new(1), 1u8);
        feed.fail_deletes("disk full");
        assert!(matches!(feed.delete("a"), Err(StoreError::Backend(_))));
        assert!(feed.contains("a"));
    }

    #[test]
    fn disposing_detaches_subscriber() {
        let feed = MemoryFeed::new("broadcasts");
        feed.ensure_exists().expect("create");
        let mut sub = feed.subscribe().expect("subscribe");
        assert_eq!(feed.subscriber_count(), 1);
        sub.dispose();
        assert_eq!(feed.subscriber_count(), 0);
        feed.add("late", Timestamp::new(3), 3u8);
    }

    #[test]
    fn indexer_records_and_fails_on_request() {
        let indexer = NullIndexer::new();
        indexer.fail("index_block", "boom");
        let tx = Transaction {
            version: 1,
            inputs: Vec::new(),
            outputs: Vec::new(),
            lock_time: 0,
        };
        assert!(indexer.index_ordered_balance(&tx).is_ok());
        let block = Block {
            header: chainwatch_types::NetworkId::Regtest.genesis_header(),
            transactions: vec![tx],
        };
        assert!(indexer.index_block(&block).is_err());
        assert_eq!(indexer.calls().len(), 2);
        assert_eq!(indexer.count(|c| matches!(c, IndexCall::Block(_))), 1);
    }
}
