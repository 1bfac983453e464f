//! The listener: owns both peer connections and wires the feeds, the
//! dispatcher and the scheduler together.
//!
//! Startup is strictly sequential and any failure is fatal:
//! 1. connect the primary peer and handshake,
//! 2. build the header chain from genesis and sync it from the primary,
//! 3. index the chain and load the stored wallet rules,
//! 4. connect the relay peer and handshake,
//! 5. subscribe to both feeds and spawn the background loops.
//!
//! Teardown runs in the reverse direction; see [`Listener::stop`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chainwatch_chain::HeaderChain;
use chainwatch_messages::VersionMessage;
use chainwatch_network::{next_nonce, Peer, PeerConnector, PeerRole, PROTOCOL_VERSION};
use chainwatch_store::{BroadcastRequest, ChangeFeed, Indexer};
use chainwatch_types::WalletRule;
use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::bridge::EventBridge;
use crate::dispatcher::Dispatcher;
use crate::registry::BroadcastRegistry;
use crate::scheduler::{blocking, TaskFailure, TaskLog, TaskScheduler};
use crate::status::{BroadcastStatusHook, NoopStatusHook};
use crate::wallets::WalletRuleSet;
use crate::{ListenerConfig, ListenerError, ListenerMetrics};

/// External collaborators handed to the listener.
#[derive(Clone)]
pub struct ListenerDeps {
    pub indexer: Arc<dyn Indexer>,
    pub broadcast_feed: Arc<dyn ChangeFeed<BroadcastRequest>>,
    pub wallet_rule_feed: Arc<dyn ChangeFeed<WalletRule>>,
    pub status_hook: Arc<dyn BroadcastStatusHook>,
}

impl ListenerDeps {
    pub fn new(
        indexer: Arc<dyn Indexer>,
        broadcast_feed: Arc<dyn ChangeFeed<BroadcastRequest>>,
        wallet_rule_feed: Arc<dyn ChangeFeed<WalletRule>>,
    ) -> Self {
        Self {
            indexer,
            broadcast_feed,
            wallet_rule_feed,
            status_hook: Arc::new(NoopStatusHook),
        }
    }

    pub fn with_status_hook(mut self, hook: Arc<dyn BroadcastStatusHook>) -> Self {
        self.status_hook = hook;
        self
    }
}

/// Everything that only exists while the listener runs.
struct Running {
    chain: Arc<HeaderChain>,
    primary: Arc<Peer>,
    relay: Arc<Peer>,
    scheduler: Arc<TaskScheduler>,
    /// Dispatch and keep-alive loops.
    loops: Vec<JoinHandle<()>>,
    /// Feed consumers; each disposes its subscription on exit.
    feed_loops: Vec<JoinHandle<()>>,
}

pub struct Listener {
    config: ListenerConfig,
    deps: ListenerDeps,
    log: Arc<TaskLog>,
    metrics: Arc<ListenerMetrics>,
    registry: Arc<BroadcastRegistry>,
    rules: Arc<WalletRuleSet>,
    /// Fired once by `stop`; every background loop selects on it.
    shutdown: broadcast::Sender<()>,
    started: AtomicBool,
    running: Mutex<Option<Running>>,
    stopped: watch::Sender<bool>,
}

impl Listener {
    pub fn new(config: ListenerConfig, deps: ListenerDeps) -> Result<Self, ListenerError> {
        let metrics = Arc::new(ListenerMetrics::new()?);
        let registry = Arc::new(BroadcastRegistry::new(
            Arc::clone(&deps.broadcast_feed),
            config.broadcast_ttl_secs,
            Arc::clone(&metrics),
        ));
        let (stopped, _) = watch::channel(true);
        let (shutdown, _) = broadcast::channel(1);
        Ok(Self {
            log: Arc::new(TaskLog::new(config.failure_history)),
            config,
            deps,
            metrics,
            registry,
            rules: Arc::new(WalletRuleSet::new()),
            shutdown,
            started: AtomicBool::new(false),
            running: Mutex::new(None),
            stopped,
        })
    }

    /// Connect to both peers and start processing. A listener starts once.
    pub async fn start<C: PeerConnector>(&self, connector: &C) -> Result<(), ListenerError> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(ListenerError::AlreadyStarted);
        }
        self.stopped.send_replace(false);
        match self.start_inner(connector).await {
            Ok(running) => {
                *self.running.lock() = Some(running);
                tracing::info!(network = self.config.network.as_str(), "listener started");
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "listener failed to start");
                self.stopped.send_replace(true);
                Err(e)
            }
        }
    }

    async fn start_inner<C: PeerConnector>(&self, connector: &C) -> Result<Running, ListenerError> {
        let network = self.config.network;

        let wire = connector.connect(PeerRole::Primary).await?;
        let (primary, primary_rx) = Peer::open(PeerRole::Primary, wire);
        primary.handshake(self.local_version(0)).await?;

        let chain = Arc::new(HeaderChain::new(network.genesis_header()));
        let added = primary.synchronize_chain(&chain).await?;
        self.metrics.chain_height.set(chain.height() as i64);
        tracing::info!(height = chain.height(), added, "initial header sync complete");

        let stored_rules = {
            let indexer = Arc::clone(&self.deps.indexer);
            let chain = Arc::clone(&chain);
            blocking(move || {
                indexer.index_chain(&chain)?;
                Ok(indexer.wallet_rules()?)
            })
            .await?
        };
        let loaded = self.rules.extend(stored_rules);
        tracing::info!(rules = loaded, "wallet rules loaded");

        let wire = connector.connect(PeerRole::Relay).await?;
        let (relay, relay_rx) = Peer::open(PeerRole::Relay, wire);
        relay.handshake(self.local_version(chain.height())).await?;

        self.deps.broadcast_feed.ensure_exists()?;
        self.deps.wallet_rule_feed.ensure_exists()?;
        let broadcasts = self.deps.broadcast_feed.subscribe()?;
        let wallet_rules = self.deps.wallet_rule_feed.subscribe()?;

        let scheduler = Arc::new(TaskScheduler::start(
            Arc::clone(&self.log),
            Arc::clone(&self.metrics),
        ));
        let dispatcher = Arc::new(Dispatcher {
            registry: Arc::clone(&self.registry),
            scheduler: Arc::clone(&scheduler),
            chain: Arc::clone(&chain),
            indexer: Arc::clone(&self.deps.indexer),
            rules: Arc::clone(&self.rules),
            primary: Arc::clone(&primary),
            relay: Arc::clone(&relay),
            hook: Arc::clone(&self.deps.status_hook),
            metrics: Arc::clone(&self.metrics),
        });
        let bridge = Arc::new(EventBridge {
            registry: Arc::clone(&self.registry),
            relay: Arc::clone(&relay),
            scheduler: Arc::clone(&scheduler),
            rules: Arc::clone(&self.rules),
            log: Arc::clone(&self.log),
            metrics: Arc::clone(&self.metrics),
        });

        let loops = vec![
            tokio::spawn(Arc::clone(&dispatcher).run(
                PeerRole::Primary,
                primary_rx,
                self.shutdown.subscribe(),
            )),
            tokio::spawn(dispatcher.run(PeerRole::Relay, relay_rx, self.shutdown.subscribe())),
            tokio::spawn(keepalive(
                vec![Arc::clone(&primary), Arc::clone(&relay)],
                self.config.keepalive_interval(),
                self.shutdown.subscribe(),
            )),
        ];
        let feed_loops = vec![
            tokio::spawn(Arc::clone(&bridge).run_broadcasts(broadcasts, self.shutdown.subscribe())),
            tokio::spawn(bridge.run_wallet_rules(wallet_rules, self.shutdown.subscribe())),
        ];

        Ok(Running {
            chain,
            primary,
            relay,
            scheduler,
            loops,
            feed_loops,
        })
    }

    fn local_version(&self, start_height: u64) -> VersionMessage {
        VersionMessage {
            magic: self.config.network.magic(),
            protocol_version: PROTOCOL_VERSION,
            user_agent: self.config.user_agent.clone(),
            start_height,
            nonce: next_nonce(),
        }
    }

    /// Tear everything down:
    /// 1. refuse new ordered work,
    /// 2. close both peer connections,
    /// 3. dispose both feed subscriptions,
    /// 4. wait for the in-flight ordered task, up to the shutdown timeout,
    /// 5. signal [`wait_until_stopped`](Self::wait_until_stopped).
    ///
    /// Does nothing if the listener is not running.
    pub async fn stop(&self) {
        let running = self.running.lock().take();
        let Some(running) = running else {
            return;
        };
        tracing::info!("listener stopping");

        running.scheduler.shutdown();

        let _ = self.shutdown.send(());
        running.primary.close();
        running.relay.close();

        for handle in running.feed_loops {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "feed consumer ended abnormally");
            }
        }

        let timeout = self.config.shutdown_timeout();
        if !running.scheduler.join(timeout).await {
            tracing::warn!(
                timeout_secs = timeout.as_secs(),
                "gave up waiting for the ordered lane"
            );
        }
        for handle in running.loops {
            handle.abort();
        }

        self.stopped.send_replace(true);
        tracing::info!("listener stopped");
    }

    /// Block until SIGINT or SIGTERM, then [`stop`](Self::stop).
    pub async fn stop_on_signal(&self) {
        termination_signal().await;
        self.stop().await;
    }

    /// Resolve once the listener has fully stopped. Returns immediately if it
    /// never started.
    pub async fn wait_until_stopped(&self) {
        let mut rx = self.stopped.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|stopped| *stopped).await;
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// The most recent task failure.
    pub fn last_error(&self) -> Option<TaskFailure> {
        self.log.last_error()
    }

    /// Recent task failures, oldest first.
    pub fn failure_history(&self) -> Vec<TaskFailure> {
        self.log.history()
    }

    pub fn task_log(&self) -> &Arc<TaskLog> {
        &self.log
    }

    pub fn chain(&self) -> Option<Arc<HeaderChain>> {
        self.running.lock().as_ref().map(|r| Arc::clone(&r.chain))
    }

    pub fn primary_peer(&self) -> Option<Arc<Peer>> {
        self.running.lock().as_ref().map(|r| Arc::clone(&r.primary))
    }

    pub fn relay_peer(&self) -> Option<Arc<Peer>> {
        self.running.lock().as_ref().map(|r| Arc::clone(&r.relay))
    }

    pub fn indexer(&self) -> &Arc<dyn Indexer> {
        &self.deps.indexer
    }

    pub fn registry(&self) -> &Arc<BroadcastRegistry> {
        &self.registry
    }

    pub fn wallet_rules(&self) -> &Arc<WalletRuleSet> {
        &self.rules
    }

    pub fn metrics(&self) -> &Arc<ListenerMetrics> {
        &self.metrics
    }

    pub fn config(&self) -> &ListenerConfig {
        &self.config
    }
}

async fn termination_signal() {
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = tokio::signal::ctrl_c() => tracing::info!("SIGINT received"),
        _ = terminate => tracing::info!("SIGTERM received"),
    }
}

/// Ping every peer once per `interval`, starting immediately.
async fn keepalive(peers: Vec<Arc<Peer>>, interval: Duration, mut shutdown: broadcast::Receiver<()>) {
    let mut ticker = tokio::time::interval(interval.max(Duration::from_secs(1)));
    loop {
        tokio::select! {
            biased;
            _ = shutdown.recv() => break,
            _ = ticker.tick() => {
                for peer in &peers {
                    match peer.ping() {
                        Ok(nonce) => tracing::trace!(peer = peer.remote(), nonce, "ping"),
                        Err(e) => tracing::warn!(peer = peer.remote(), error = %e, "keep-alive ping failed"),
                    }
                }
            }
        }
    }
    tracing::debug!("keep-alive loop exited");
}
