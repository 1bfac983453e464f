//! Prometheus metrics for the listener.
//!
//! [`ListenerMetrics`] owns a dedicated [`Registry`]; a host process can
//! expose it through [`ListenerMetrics::encode_text`].

use prometheus::{
    register_int_counter_with_registry, register_int_gauge_with_registry, Encoder, IntCounter,
    IntGauge, Opts, Registry, TextEncoder,
};

/// Central collection of all listener-level Prometheus metrics.
pub struct ListenerMetrics {
    /// The Prometheus registry that owns every metric below.
    pub registry: Registry,

    // ── Counters ────────────────────────────────────────────────────────
    /// Inventory announcements sent to the relay peer.
    pub announcements_sent: IntCounter,
    /// Transactions handed to the relay peer in answer to `GetData`.
    pub transactions_relayed: IntCounter,
    /// `Reject` messages received for tracked transactions.
    pub rejections: IntCounter,
    /// Messages dispatched from either peer.
    pub messages_received: IntCounter,
    /// Scheduled units that completed without error.
    pub tasks_completed: IntCounter,
    /// Scheduled units that returned an error or panicked.
    pub tasks_failed: IntCounter,

    // ── Gauges ──────────────────────────────────────────────────────────
    /// Broadcast transactions currently tracked.
    pub tracked_transactions: IntGauge,
    /// Height of the local header chain tip.
    pub chain_height: IntGauge,
}

impl ListenerMetrics {
    /// Create a fresh set of metrics, all registered under a new
    /// [`Registry`].
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        // Counters
        let announcements_sent = register_int_counter_with_registry!(
            Opts::new(
                "chainwatch_announcements_sent_total",
                "Inventory announcements sent to the relay peer"
            ),
            registry
        )?;

        let transactions_relayed = register_int_counter_with_registry!(
            Opts::new(
                "chainwatch_transactions_relayed_total",
                "Transactions sent to the relay peer on request"
            ),
            registry
        )?;

        let rejections = register_int_counter_with_registry!(
            Opts::new(
                "chainwatch_rejections_total",
                "Rejections received for tracked transactions"
            ),
            registry
        )?;

        let messages_received = register_int_counter_with_registry!(
            Opts::new(
                "chainwatch_messages_received_total",
                "Peer messages dispatched"
            ),
            registry
        )?;

        let tasks_completed = register_int_counter_with_registry!(
            Opts::new(
                "chainwatch_tasks_completed_total",
                "Scheduled tasks that completed"
            ),
            registry
        )?;

        let tasks_failed = register_int_counter_with_registry!(
            Opts::new("chainwatch_tasks_failed_total", "Scheduled tasks that failed"),
            registry
        )?;

        // Gauges
        let tracked_transactions = register_int_gauge_with_registry!(
            Opts::new(
                "chainwatch_tracked_transactions",
                "Broadcast transactions currently tracked"
            ),
            registry
        )?;

        let chain_height = register_int_gauge_with_registry!(
            Opts::new("chainwatch_chain_height", "Height of the header chain tip"),
            registry
        )?;

        Ok(Self {
            registry,
            announcements_sent,
            transactions_relayed,
            rejections,
            messages_received,
            tasks_completed,
            tasks_failed,
            tracked_transactions,
            chain_height,
        })
    }

    /// Render every metric in the Prometheus text exposition format.
    pub fn encode_text(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exposition_lists_every_metric() {
        let metrics = ListenerMetrics::new().expect("registers");
        metrics.announcements_sent.inc();
        metrics.chain_height.set(12);

        let text = metrics.encode_text().expect("encodes");
        assert!(text.contains("chainwatch_announcements_sent_total 1"));
        assert!(text.contains("chainwatch_chain_height 12"));
        assert!(text.contains("chainwatch_tasks_failed_total 0"));
    }

    #[test]
    fn registries_are_independent() {
        let a = ListenerMetrics::new().expect("registers");
        let b = ListenerMetrics::new().expect("registers");
        a.rejections.inc();
        assert_eq!(b.rejections.get(), 0);
    }
}
