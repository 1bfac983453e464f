//! Nullable network: scripted remote peers over in-memory wires.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chainwatch_chain::{HeaderChain, MAX_HEADERS_PER_MESSAGE};
use chainwatch_messages::{PeerMessage, VersionMessage};
use chainwatch_network::{next_nonce, NetworkError, PeerConnector, PeerRole, Wire, PROTOCOL_VERSION};
use chainwatch_types::{Block, BlockHeader, NetworkId, Transaction};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// The far end of a connection, played in-process.
///
/// Answers `Version` with `Version` + `Verack`, `Ping` with `Pong` and
/// `GetHeaders` from its own header chain. Everything it receives is
/// recorded.
pub struct NullPeer {
    name: String,
    chain: Arc<HeaderChain>,
    to_listener: mpsc::UnboundedSender<PeerMessage>,
    received: Arc<Mutex<Vec<PeerMessage>>>,
    disconnected: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl NullPeer {
    /// A peer on `network` whose chain holds only the genesis header.
    /// Returns the peer and the wire the listener should use to reach it.
    pub fn new(name: &str, network: NetworkId) -> (NullPeer, Wire) {
        Self::with_magic(name, network.magic(), HeaderChain::new(network.genesis_header()))
    }

    pub fn with_chain(name: &str, network: NetworkId, chain: HeaderChain) -> (NullPeer, Wire) {
        Self::with_magic(name, network.magic(), chain)
    }

    /// A peer announcing `magic` in its version message.
    pub fn with_magic(name: &str, magic: [u8; 4], chain: HeaderChain) -> (NullPeer, Wire) {
        let (listener_side, mut remote) = Wire::pair("listener", name);
        let chain = Arc::new(chain);
        let received = Arc::new(Mutex::new(Vec::new()));
        let disconnected = Arc::new(AtomicBool::new(false));
        let to_listener = remote.outbound.clone();

        let task = tokio::spawn({
            let chain = Arc::clone(&chain);
            let received = Arc::clone(&received);
            let disconnected = Arc::clone(&disconnected);
            let user_agent = format!("/{name}/");
            async move {
                while let Some(message) = remote.inbound.recv().await {
                    received.lock().push(message.clone());
                    let reply = match message {
                        PeerMessage::Version(_) => {
                            let _ = remote.outbound.send(PeerMessage::Version(VersionMessage {
                                magic,
                                protocol_version: PROTOCOL_VERSION,
                                user_agent: user_agent.clone(),
                                start_height: chain.height(),
                                nonce: next_nonce(),
                            }));
                            Some(PeerMessage::Verack)
                        }
                        PeerMessage::Ping(nonce) => Some(PeerMessage::Pong(nonce)),
                        PeerMessage::GetHeaders(req) => Some(PeerMessage::Headers(
                            chain.headers_after(&req.locator, MAX_HEADERS_PER_MESSAGE),
                        )),
                        _ => None,
                    };
                    if let Some(reply) = reply {
                        let _ = remote.outbound.send(reply);
                    }
                }
                disconnected.store(true, Ordering::Release);
            }
        });

        let peer = NullPeer {
            name: name.to_string(),
            chain,
            to_listener,
            received,
            disconnected,
            task,
        };
        (peer, listener_side)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn chain(&self) -> &HeaderChain {
        &self.chain
    }

    /// Append `count` headers to this peer's chain and return them.
    pub fn extend_chain(&self, count: usize) -> Vec<BlockHeader> {
        let mut prev = self.chain.tip().header;
        let base = self.chain.height() as u32;
        let mut headers = Vec::with_capacity(count);
        for i in 0..count {
            let next = BlockHeader::child_of(&prev, base + i as u32);
            headers.push(next.clone());
            prev = next;
        }
        // Every header extends the previous one, so this cannot fail.
        let _ = self.chain.connect(&headers);
        headers
    }

    /// Extend the chain by one header and return the full block for it.
    pub fn mine(&self, transactions: Vec<Transaction>) -> Block {
        let header = self
            .extend_chain(1)
            .pop()
            .unwrap_or_else(|| self.chain.tip().header);
        Block {
            header,
            transactions,
        }
    }

    /// Send a message to the listener. Returns false once the listener side
    /// has gone away.
    pub fn inject(&self, message: PeerMessage) -> bool {
        self.to_listener.send(message).is_ok()
    }

    /// Every message received from the listener so far.
    pub fn received(&self) -> Vec<PeerMessage> {
        self.received.lock().clone()
    }

    pub fn count(&self, pred: impl Fn(&PeerMessage) -> bool) -> usize {
        self.received.lock().iter().filter(|m| pred(m)).count()
    }

    /// Wait until at least `n` received messages satisfy `pred`.
    pub async fn wait_for(
        &self,
        pred: impl Fn(&PeerMessage) -> bool,
        n: usize,
        timeout: Duration,
    ) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.count(&pred) >= n {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// True once the listener closed its side of the connection.
    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::Acquire)
    }

    pub async fn wait_disconnected(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while !self.is_disconnected() {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        true
    }
}

impl Drop for NullPeer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Hands out prepared wires instead of dialing out.
#[derive(Default)]
pub struct NullConnector {
    wires: Mutex<HashMap<PeerRole, VecDeque<Wire>>>,
    attempts: Mutex<Vec<PeerRole>>,
}

impl NullConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_peers(primary: Wire, relay: Wire) -> Self {
        let connector = Self::new();
        connector.push(PeerRole::Primary, primary);
        connector.push(PeerRole::Relay, relay);
        connector
    }

    pub fn push(&self, role: PeerRole, wire: Wire) {
        self.wires.lock().entry(role).or_default().push_back(wire);
    }

    /// Roles requested so far, in order.
    pub fn attempts(&self) -> Vec<PeerRole> {
        self.attempts.lock().clone()
    }
}

impl PeerConnector for NullConnector {
    async fn connect(&self, role: PeerRole) -> Result<Wire, NetworkError> {
        self.attempts.lock().push(role);
        let wire = self.wires.lock().get_mut(&role).and_then(VecDeque::pop_front);
        wire.ok_or_else(|| NetworkError::ConnectionFailed(format!("no {role} peer available")))
    }
}
