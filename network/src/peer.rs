//! A single handshaken peer connection.
//!
//! [`Peer::open`] takes over a [`Wire`] and splits its inbound traffic:
//! pings are answered on the spot, handshake and header replies go to an
//! internal control channel consumed by [`Peer::handshake`] and
//! [`Peer::get_headers`], and everything else is handed back to the caller
//! for dispatch.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chainwatch_chain::{HeaderChain, MAX_HEADERS_PER_MESSAGE};
use chainwatch_messages::{GetHeadersMessage, PeerMessage, VersionMessage};
use chainwatch_types::{BlockHash, BlockHeader};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::{NetworkError, Wire};

/// Protocol version announced in our `Version` message.
pub const PROTOCOL_VERSION: u32 = 70_015;

/// Timeout for the complete version/verack exchange.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for a request/response round trip such as `GetHeaders`.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

static NONCE_SEQ: AtomicU64 = AtomicU64::new(0);

/// A nonce for `Version` and `Ping` messages, unique within this process.
pub fn next_nonce() -> u64 {
    let seq = NONCE_SEQ.fetch_add(1, Ordering::Relaxed);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    nanos ^ seq.rotate_left(32)
}

/// What a connection is used for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PeerRole {
    /// Source of chain data. Receives `GetData` and `GetHeaders`.
    Primary,
    /// Target for broadcasting transactions.
    Relay,
}

impl PeerRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Relay => "relay",
        }
    }
}

impl fmt::Display for PeerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct Peer {
    remote: String,
    role: PeerRole,
    outbound: Mutex<Option<mpsc::UnboundedSender<PeerMessage>>>,
    /// Replies the peer itself waits for. Locked for the duration of one
    /// request so replies are never handed to the wrong caller.
    control: tokio::sync::Mutex<mpsc::UnboundedReceiver<PeerMessage>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
    request_timeout: Duration,
}

impl Peer {
    /// Take over `wire`. Returns the peer and the receiver of every message
    /// that is neither answered automatically nor consumed by a request.
    pub fn open(role: PeerRole, wire: Wire) -> (Arc<Peer>, mpsc::UnboundedReceiver<PeerMessage>) {
        Self::open_with_timeout(role, wire, REQUEST_TIMEOUT)
    }

    pub fn open_with_timeout(
        role: PeerRole,
        wire: Wire,
        request_timeout: Duration,
    ) -> (Arc<Peer>, mpsc::UnboundedReceiver<PeerMessage>) {
        let Wire {
            remote,
            outbound,
            mut inbound,
            mut tasks,
        } = wire;
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (dispatch_tx, dispatch_rx) = mpsc::unbounded_channel();

        let pong_tx = outbound.clone();
        let demux_peer = remote.clone();
        tasks.push(tokio::spawn(async move {
            while let Some(message) = inbound.recv().await {
                match message {
                    PeerMessage::Ping(nonce) => {
                        if pong_tx.send(PeerMessage::Pong(nonce)).is_err() {
                            break;
                        }
                    }
                    PeerMessage::Version(_) | PeerMessage::Verack | PeerMessage::Headers(_) => {
                        let _ = control_tx.send(message);
                    }
                    other => {
                        if dispatch_tx.send(other).is_err() {
                            tracing::debug!(peer = %demux_peer, "dispatch receiver dropped");
                        }
                    }
                }
            }
            tracing::debug!(peer = %demux_peer, role = %role, "inbound stream ended");
        }));

        let peer = Arc::new(Peer {
            remote,
            role,
            outbound: Mutex::new(Some(outbound)),
            control: tokio::sync::Mutex::new(control_rx),
            tasks: Mutex::new(tasks),
            closed: AtomicBool::new(false),
            request_timeout,
        });
        (peer, dispatch_rx)
    }

    pub fn remote(&self) -> &str {
        &self.remote
    }

    pub fn role(&self) -> PeerRole {
        self.role
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Queue a message for the peer.
    pub fn send(&self, message: PeerMessage) -> Result<(), NetworkError> {
        let guard = self.outbound.lock();
        let sender = guard
            .as_ref()
            .ok_or_else(|| NetworkError::Disconnected(self.remote.clone()))?;
        sender
            .send(message)
            .map_err(|_| NetworkError::Disconnected(self.remote.clone()))
    }

    /// Send a liveness probe. The reply arrives as a `Pong` on the dispatch
    /// receiver.
    pub fn ping(&self) -> Result<u64, NetworkError> {
        let nonce = next_nonce();
        self.send(PeerMessage::Ping(nonce))?;
        Ok(nonce)
    }

    /// Exchange `Version`/`Verack` with the peer. Returns the peer's version.
    pub async fn handshake(&self, local: VersionMessage) -> Result<VersionMessage, NetworkError> {
        let mut control = self.control.lock().await;
        self.send(PeerMessage::Version(local.clone()))?;

        let exchange = async {
            let mut remote_version: Option<VersionMessage> = None;
            let mut acknowledged = false;
            loop {
                match control.recv().await {
                    Some(PeerMessage::Version(version)) => {
                        if version.magic != local.magic {
                            return Err(NetworkError::HandshakeFailed {
                                peer: self.remote.clone(),
                                reason: "network magic mismatch".into(),
                            });
                        }
                        if let Err(e) = self.send(PeerMessage::Verack) {
                            return Err(e);
                        }
                        remote_version = Some(version);
                    }
                    Some(PeerMessage::Verack) => acknowledged = true,
                    Some(other) => {
                        tracing::debug!(
                            peer = %self.remote,
                            command = other.command(),
                            "ignoring message during handshake"
                        );
                    }
                    None => return Err(NetworkError::Disconnected(self.remote.clone())),
                }
                if acknowledged {
                    if let Some(version) = remote_version.take() {
                        return Ok(version);
                    }
                }
            }
        };

        let version = tokio::time::timeout(HANDSHAKE_TIMEOUT, exchange)
            .await
            .map_err(|_| NetworkError::Timeout {
                peer: self.remote.clone(),
                what: "handshake",
            })??;

        tracing::info!(
            peer = %self.remote,
            role = %self.role,
            user_agent = %version.user_agent,
            start_height = version.start_height,
            "handshake complete"
        );
        Ok(version)
    }

    /// Request the headers following the first hash of `locator` the peer
    /// knows.
    ///
    /// Replies to earlier requests that timed out are discarded, as is any
    /// batch whose first header does not build on a locator hash.
    pub async fn get_headers(&self, locator: Vec<BlockHash>) -> Result<Vec<BlockHeader>, NetworkError> {
        let mut control = self.control.lock().await;
        while let Ok(stale) = control.try_recv() {
            tracing::debug!(
                peer = %self.remote,
                command = stale.command(),
                "discarding late reply"
            );
        }
        self.send(PeerMessage::GetHeaders(GetHeadersMessage {
            locator: locator.clone(),
            stop: BlockHash::ZERO,
        }))?;

        let reply = async {
            loop {
                match control.recv().await {
                    Some(PeerMessage::Headers(headers)) if follows_locator(&headers, &locator) => {
                        return Ok(headers)
                    }
                    Some(PeerMessage::Headers(headers)) => {
                        tracing::debug!(
                            peer = %self.remote,
                            count = headers.len(),
                            "ignoring headers that do not follow the locator"
                        );
                    }
                    Some(other) => {
                        tracing::debug!(
                            peer = %self.remote,
                            command = other.command(),
                            "ignoring message while waiting for headers"
                        );
                    }
                    None => return Err(NetworkError::Disconnected(self.remote.clone())),
                }
            }
        };

        tokio::time::timeout(self.request_timeout, reply)
            .await
            .map_err(|_| NetworkError::Timeout {
                peer: self.remote.clone(),
                what: "headers",
            })?
    }

    /// Pull headers from the peer until `chain` has caught up with it.
    /// Returns the number of headers added.
    pub async fn synchronize_chain(&self, chain: &HeaderChain) -> Result<usize, NetworkError> {
        let mut added = 0;
        loop {
            let headers = self.get_headers(chain.locator()).await?;
            if headers.is_empty() {
                break;
            }
            let outcome = chain.connect(&headers)?;
            added += outcome.connected;
            if let Some(ancestor) = outcome.reorg_from {
                tracing::info!(peer = %self.remote, ancestor, "header chain reorganized");
            }
            if outcome.connected == 0 || headers.len() < MAX_HEADERS_PER_MESSAGE {
                break;
            }
        }
        tracing::debug!(
            peer = %self.remote,
            height = chain.height(),
            added,
            "header chain synchronized"
        );
        Ok(added)
    }

    /// Disconnect. Further sends fail with [`NetworkError::Disconnected`].
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.outbound.lock().take();
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        tracing::info!(peer = %self.remote, role = %self.role, "peer connection closed");
    }
}

/// An empty batch answers any request. With no locator there is nothing to
/// check against.
fn follows_locator(headers: &[BlockHeader], locator: &[BlockHash]) -> bool {
    match headers.first() {
        Some(first) => locator.is_empty() || locator.contains(&first.prev_block),
        None => true,
    }
}

impl Drop for Peer {
    fn drop(&mut self) {
        for task in self.tasks.get_mut().drain(..) {
            task.abort();
        }
    }
}
