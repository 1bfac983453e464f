//! Consumer loops for the broadcast-request and wallet-rule feeds.

use std::sync::Arc;

use chainwatch_messages::PeerMessage;
use chainwatch_network::Peer;
use chainwatch_store::{BroadcastRequest, FeedEvent, FeedRecord, FeedSubscription};
use chainwatch_types::{InventoryItem, Timestamp, TxHash, WalletRule};
use tokio::sync::broadcast;
use tracing::{debug, error, info};

use crate::registry::BroadcastRegistry;
use crate::scheduler::{Lane, TaskLog, TaskScheduler};
use crate::tracing_spans::feed_event_span;
use crate::wallets::WalletRuleSet;
use crate::{ListenerMetrics, TaskFault};

/// Name under which broadcast-feed failures are recorded.
pub const NEW_BROADCAST_TASK: &str = "new broadcasted transaction";

pub struct EventBridge {
    pub(crate) registry: Arc<BroadcastRegistry>,
    pub(crate) relay: Arc<Peer>,
    pub(crate) scheduler: Arc<TaskScheduler>,
    pub(crate) rules: Arc<WalletRuleSet>,
    pub(crate) log: Arc<TaskLog>,
    pub(crate) metrics: Arc<ListenerMetrics>,
}

impl EventBridge {
    pub async fn run_broadcasts(
        self: Arc<Self>,
        mut subscription: FeedSubscription<BroadcastRequest>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                biased;
                _ = shutdown.recv() => break,
                event = subscription.next() => match event {
                    Some(event) => self.on_broadcast_event(event, Timestamp::now()),
                    None => break,
                },
            }
        }
        subscription.dispose();
        debug!("broadcast feed subscription disposed");
    }

    pub async fn run_wallet_rules(
        self: Arc<Self>,
        mut subscription: FeedSubscription<WalletRule>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                biased;
                _ = shutdown.recv() => break,
                event = subscription.next() => match event {
                    Some(event) => self.on_wallet_rule_event(event),
                    None => break,
                },
            }
        }
        subscription.dispose();
        debug!("wallet rule feed subscription disposed");
    }

    /// Track a newly requested broadcast and announce it to the relay peer,
    /// then apply the expiry policy to the record.
    pub fn on_broadcast_event(&self, event: FeedEvent<BroadcastRequest>, now: Timestamp) {
        let FeedEvent::Added(record) = event else {
            return;
        };
        let _span = feed_event_span("broadcasts", &record.key).entered();

        let (hash, outcome) = self.track(&record, now);
        if let Err(fault) = outcome {
            error!(key = %record.key, error = %fault, "failed to handle broadcast request");
            self.log.record_failure(NEW_BROADCAST_TASK, None, fault);
        }
        self.registry
            .check_expiry(&record.key, record.timestamp, hash.as_ref(), now);
    }

    fn track(
        &self,
        record: &FeedRecord<BroadcastRequest>,
        now: Timestamp,
    ) -> (Option<TxHash>, Result<(), TaskFault>) {
        let tx = match record.value.decode() {
            Ok(tx) => tx,
            Err(e) => return (None, Err(e.into())),
        };
        let hash = tx.hash();
        let (_, inserted) = self.registry.get_or_add(hash, tx, &record.key, now);
        if !inserted {
            debug!(tx = %hash, "broadcast request already tracked");
            return (Some(hash), Ok(()));
        }

        let announced = self
            .relay
            .send(PeerMessage::Inv(vec![InventoryItem::Tx(hash)]))
            .map_err(TaskFault::from);
        if announced.is_ok() {
            self.metrics.announcements_sent.inc();
            info!(tx = %hash, "broadcast transaction announced");
        }
        (Some(hash), announced)
    }

    pub fn on_wallet_rule_event(&self, event: FeedEvent<WalletRule>) {
        let FeedEvent::Added(record) = event else {
            return;
        };
        let rules = Arc::clone(&self.rules);
        let rule = record.value;
        self.scheduler.schedule("add wallet rule", Lane::Ordered, async move {
            let wallet = rule.wallet_id.clone();
            if rules.append(rule) {
                info!(wallet = %wallet, rules = rules.len(), "wallet rule added");
            }
            Ok(())
        });
    }
}
