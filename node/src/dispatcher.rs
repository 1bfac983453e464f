//! Per-peer protocol message handling.
//!
//! The primary peer supplies chain data: inventory, transactions and
//! blocks. The relay peer is where tracked transactions are broadcast; it
//! asks for them with `GetData` and may answer with `Reject`.

use std::sync::Arc;

use chainwatch_chain::HeaderChain;
use chainwatch_messages::{PeerMessage, RejectCode, RejectMessage};
use chainwatch_network::{Peer, PeerRole};
use chainwatch_store::Indexer;
use chainwatch_types::{Block, InventoryItem, Transaction};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, trace, warn};

use crate::registry::BroadcastRegistry;
use crate::scheduler::{blocking, Lane, TaskScheduler};
use crate::status::BroadcastStatusHook;
use crate::tracing_spans::peer_message_span;
use crate::wallets::{extract_balances, WalletRuleSet};
use crate::ListenerMetrics;

pub struct Dispatcher {
    pub(crate) registry: Arc<BroadcastRegistry>,
    pub(crate) scheduler: Arc<TaskScheduler>,
    pub(crate) chain: Arc<HeaderChain>,
    pub(crate) indexer: Arc<dyn Indexer>,
    pub(crate) rules: Arc<WalletRuleSet>,
    pub(crate) primary: Arc<Peer>,
    pub(crate) relay: Arc<Peer>,
    pub(crate) hook: Arc<dyn BroadcastStatusHook>,
    pub(crate) metrics: Arc<ListenerMetrics>,
}

impl Dispatcher {
    /// Consume messages from the peer serving `role` until the stream ends
    /// or shutdown is signalled.
    pub async fn run(
        self: Arc<Self>,
        role: PeerRole,
        mut messages: mpsc::UnboundedReceiver<PeerMessage>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                biased;
                _ = shutdown.recv() => break,
                message = messages.recv() => match message {
                    Some(message) => self.dispatch(role, message),
                    None => {
                        info!(role = %role, "peer message stream ended");
                        break;
                    }
                },
            }
        }
        debug!(role = %role, "dispatch loop exited");
    }

    pub fn dispatch(&self, role: PeerRole, message: PeerMessage) {
        let peer = match role {
            PeerRole::Primary => &self.primary,
            PeerRole::Relay => &self.relay,
        };
        let _span = peer_message_span(peer.remote(), message.command()).entered();
        self.metrics.messages_received.inc();
        match role {
            PeerRole::Primary => self.on_primary_message(message),
            PeerRole::Relay => self.on_relay_message(message),
        }
    }

    pub fn on_primary_message(&self, message: PeerMessage) {
        match message {
            PeerMessage::Inv(items) => self.on_inventory(items),
            PeerMessage::Tx(tx) => self.on_transaction(tx),
            PeerMessage::Block(block) => self.on_block(block),
            PeerMessage::Pong(nonce) => debug!(peer = "primary", nonce, "pong"),
            other => trace!(command = other.command(), "ignoring message from primary"),
        }
    }

    pub fn on_relay_message(&self, message: PeerMessage) {
        match message {
            PeerMessage::GetData(items) => self.on_get_data(items),
            PeerMessage::Reject(reject) => self.on_reject(reject),
            PeerMessage::Pong(nonce) => debug!(peer = "relay", nonce, "pong"),
            other => trace!(command = other.command(), "ignoring message from relay"),
        }
    }

    fn on_inventory(&self, items: Vec<InventoryItem>) {
        for hash in items.iter().filter_map(InventoryItem::tx_hash) {
            if self.registry.contains(&hash) {
                info!(tx = %hash, "broadcast transaction reached mempool");
            }
        }
        if let Err(e) = self.primary.send(PeerMessage::GetData(items)) {
            warn!(error = %e, "failed to request advertised inventory");
        }
    }

    fn on_transaction(&self, tx: Transaction) {
        let indexer = Arc::clone(&self.indexer);
        let rules = Arc::clone(&self.rules);
        let scheduler = Arc::clone(&self.scheduler);
        self.scheduler
            .schedule("index transaction", Lane::Parallel, async move {
                let tx = Arc::new(tx);
                let hash = tx.hash();
                {
                    let indexer = Arc::clone(&indexer);
                    let tx = Arc::clone(&tx);
                    blocking(move || {
                        indexer.index_transaction(&hash, &tx)?;
                        indexer.index_ordered_balance(&tx)?;
                        Ok(())
                    })
                    .await?;
                }

                scheduler.schedule("index wallet balances", Lane::Parallel, async move {
                    let groups = extract_balances(&rules.snapshot(), &hash, &tx);
                    if groups.is_empty() {
                        return Ok(());
                    }
                    blocking(move || {
                        for (partition, changes) in &groups {
                            indexer.index_wallet_balances(partition, changes)?;
                        }
                        Ok(())
                    })
                    .await
                });
                Ok(())
            });
    }

    fn on_block(&self, block: Block) {
        let primary = Arc::clone(&self.primary);
        let chain = Arc::clone(&self.chain);
        let indexer = Arc::clone(&self.indexer);
        let rules = Arc::clone(&self.rules);
        let scheduler = Arc::clone(&self.scheduler);
        let metrics = Arc::clone(&self.metrics);
        self.scheduler.schedule("process block", Lane::Ordered, async move {
            let block = Arc::new(block);
            let added = primary.synchronize_chain(&chain).await?;
            {
                let indexer = Arc::clone(&indexer);
                let chain = Arc::clone(&chain);
                blocking(move || Ok(indexer.index_chain(&chain)?)).await?;
            }
            metrics.chain_height.set(chain.height() as i64);
            info!(height = chain.height(), added, "header chain updated");

            let hash = block.hash();
            let Some(header) = chain.get_by_hash(&hash) else {
                debug!(block = %hash, "block is not on the header chain");
                return Ok(());
            };
            let height = header.height;

            {
                let indexer = Arc::clone(&indexer);
                let block = Arc::clone(&block);
                let rules = rules.snapshot();
                blocking(move || Ok(indexer.index_wallet_ordered_balance(height, &block, &rules)?))
                    .await?;
            }

            {
                let indexer = Arc::clone(&indexer);
                let block = Arc::clone(&block);
                scheduler.schedule("index block", Lane::Parallel, async move {
                    blocking(move || Ok(indexer.index_block(&block)?)).await
                });
            }
            {
                let indexer = Arc::clone(&indexer);
                let block = Arc::clone(&block);
                scheduler.schedule("index block transactions", Lane::Parallel, async move {
                    blocking(move || Ok(indexer.index_transactions(height, &block)?)).await
                });
            }
            scheduler.schedule("index block balances", Lane::Parallel, async move {
                blocking(move || Ok(indexer.index_block_ordered_balance(height, &block)?)).await
            });
            Ok(())
        });
    }

    fn on_get_data(&self, items: Vec<InventoryItem>) {
        for item in items {
            let InventoryItem::Tx(hash) = item else {
                trace!(item = %item, "relay asked for a non-transaction item");
                continue;
            };
            let Some(entry) = self.registry.detach(&hash) else {
                debug!(tx = %hash, "relay asked for an untracked transaction");
                continue;
            };
            let tx = Transaction::clone(&entry.transaction);
            match self.relay.send(PeerMessage::Tx(tx)) {
                Ok(()) => {
                    self.metrics.transactions_relayed.inc();
                    info!(tx = %hash, "transaction relayed");
                    self.registry.delete_record(&entry.record_key);
                }
                Err(e) => {
                    warn!(tx = %hash, error = %e, "failed to relay transaction; still tracked");
                    self.registry.restore(entry);
                }
            }
        }
    }

    fn on_reject(&self, reject: RejectMessage) {
        let Some(hash) = reject.hash else {
            debug!(message = %reject.message, code = %reject.code, "reject without a hash");
            return;
        };
        if !self.registry.remove(&hash) {
            debug!(tx = %hash, code = %reject.code, "reject for an untracked transaction");
            return;
        }
        self.metrics.rejections.inc();
        if reject.code == RejectCode::Duplicate {
            info!(tx = %hash, "relay already knows the transaction");
            return;
        }
        warn!(tx = %hash, code = %reject.code, reason = %reject.reason, "transaction rejected");
        self.hook.broadcast_rejected(&hash, reject.code.as_str());
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use chainwatch_nullables::{MemoryFeed, NullIndexer, NullPeer};
    use chainwatch_store::BroadcastRequest;
    use chainwatch_types::{NetworkId, Timestamp};

    use crate::scheduler::TaskLog;
    use crate::status::NoopStatusHook;

    struct Fixture {
        dispatcher: Dispatcher,
        feed: Arc<MemoryFeed<BroadcastRequest>>,
        primary: NullPeer,
        relay: NullPeer,
    }

    fn fixture() -> Fixture {
        let metrics = Arc::new(ListenerMetrics::new().expect("metrics"));
        let feed = Arc::new(MemoryFeed::new("broadcasts"));
        let registry = Arc::new(BroadcastRegistry::new(
            feed.clone(),
            24 * 60 * 60,
            Arc::clone(&metrics),
        ));
        let (primary, primary_wire) = NullPeer::new("primary", NetworkId::Regtest);
        let (relay, relay_wire) = NullPeer::new("relay", NetworkId::Regtest);
        let (primary_peer, _primary_rx) = Peer::open(PeerRole::Primary, primary_wire);
        let (relay_peer, _relay_rx) = Peer::open(PeerRole::Relay, relay_wire);

        let dispatcher = Dispatcher {
            registry,
            scheduler: Arc::new(TaskScheduler::start(
                Arc::new(TaskLog::new(4)),
                Arc::clone(&metrics),
            )),
            chain: Arc::new(HeaderChain::new(NetworkId::Regtest.genesis_header())),
            indexer: Arc::new(NullIndexer::new()),
            rules: Arc::new(WalletRuleSet::new()),
            primary: primary_peer,
            relay: relay_peer,
            hook: Arc::new(NoopStatusHook),
            metrics,
        };
        Fixture {
            dispatcher,
            feed,
            primary,
            relay,
        }
    }

    fn track(f: &Fixture, key: &str, n: u32) -> Transaction {
        let tx = Transaction {
            version: 1,
            inputs: Vec::new(),
            outputs: Vec::new(),
            lock_time: n,
        };
        f.feed.add_now(key, BroadcastRequest::new(&tx));
        f.dispatcher
            .registry
            .get_or_add(tx.hash(), tx.clone(), key, Timestamp::now());
        tx
    }

    #[tokio::test]
    async fn get_data_relays_then_forgets_the_request() {
        let f = fixture();
        let tx = track(&f, "k", 1);

        f.dispatcher
            .on_relay_message(PeerMessage::GetData(vec![InventoryItem::Tx(tx.hash())]));

        let expected = PeerMessage::Tx(tx.clone());
        assert!(
            f.relay
                .wait_for(move |m: &PeerMessage| m == &expected, 1, Duration::from_secs(2))
                .await
        );
        assert!(!f.dispatcher.registry.contains(&tx.hash()));
        assert!(!f.feed.contains("k"));
        assert_eq!(f.dispatcher.metrics.transactions_relayed.get(), 1);
    }

    #[tokio::test]
    async fn get_data_on_closed_relay_keeps_the_request() {
        let f = fixture();
        let tx = track(&f, "k", 2);
        f.dispatcher.relay.close();

        f.dispatcher
            .on_relay_message(PeerMessage::GetData(vec![InventoryItem::Tx(tx.hash())]));

        let kept = f.dispatcher.registry.get(&tx.hash()).expect("still tracked");
        assert_eq!(kept.record_key, "k");
        assert!(f.feed.contains("k"));
        assert!(f.feed.deleted_keys().is_empty());
        assert_eq!(f.dispatcher.metrics.transactions_relayed.get(), 0);
    }

    #[tokio::test]
    async fn every_inventory_is_answered() {
        let f = fixture();
        f.dispatcher.on_primary_message(PeerMessage::Inv(Vec::new()));
        assert!(
            f.primary
                .wait_for(
                    |m: &PeerMessage| m == &PeerMessage::GetData(Vec::new()),
                    1,
                    Duration::from_secs(2)
                )
                .await
        );
    }
}
