//! Opening transport links to the configured peers.

use std::future::Future;
use std::time::Duration;

use tokio::net::TcpStream;

use crate::{NetworkError, PeerRole, Wire};

/// Timeout for establishing a TCP connection.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Produces a fresh [`Wire`] to the peer serving `role`.
pub trait PeerConnector: Send + Sync {
    fn connect(&self, role: PeerRole) -> impl Future<Output = Result<Wire, NetworkError>> + Send;
}

/// Connects to fixed `host:port` addresses over TCP.
#[derive(Clone, Debug)]
pub struct TcpConnector {
    primary: String,
    relay: String,
}

impl TcpConnector {
    pub fn new(primary: impl Into<String>, relay: impl Into<String>) -> Self {
        Self {
            primary: primary.into(),
            relay: relay.into(),
        }
    }

    pub fn address(&self, role: PeerRole) -> &str {
        match role {
            PeerRole::Primary => &self.primary,
            PeerRole::Relay => &self.relay,
        }
    }
}

impl PeerConnector for TcpConnector {
    async fn connect(&self, role: PeerRole) -> Result<Wire, NetworkError> {
        let addr = self.address(role).to_string();
        let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(&addr))
            .await
            .map_err(|_| NetworkError::Timeout {
                peer: addr.clone(),
                what: "connection",
            })?
            .map_err(|e| NetworkError::ConnectionFailed(format!("TCP connect to {addr} failed: {e}")))?;
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(peer = %addr, error = %e, "could not disable Nagle");
        }
        tracing::info!(peer = %addr, role = %role, "connected");
        Ok(Wire::from_stream(addr, stream))
    }
}
