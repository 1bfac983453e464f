use chainwatch_chain::ChainError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("handshake with {peer} failed: {reason}")]
    HandshakeFailed { peer: String, reason: String },

    #[error("peer {0} disconnected")]
    Disconnected(String),

    #[error("timed out waiting for {what} from {peer}")]
    Timeout { peer: String, what: &'static str },

    #[error("message too large: {size} > {max}")]
    MessageTooLarge { size: usize, max: usize },

    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("header sync failed: {0}")]
    Sync(#[from] ChainError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
