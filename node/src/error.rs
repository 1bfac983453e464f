use chainwatch_types::DecodeError;
use thiserror::Error;

/// Errors surfaced by the listener's public operations.
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("network error: {0}")]
    Network(#[from] chainwatch_network::NetworkError),

    #[error("store error: {0}")]
    Store(#[from] chainwatch_store::StoreError),

    #[error("config error: {0}")]
    Config(String),

    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("listener already started")]
    AlreadyStarted,

    #[error("background task failed: {0}")]
    Task(#[from] TaskFault),
}

/// Why a scheduled unit of work failed.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TaskFault {
    #[error("network: {0}")]
    Network(String),

    #[error("store: {0}")]
    Store(String),

    #[error("chain: {0}")]
    Chain(String),

    #[error("decode: {0}")]
    Decode(String),

    #[error("panicked: {0}")]
    Panicked(String),

    #[error("cancelled")]
    Cancelled,
}

impl From<chainwatch_network::NetworkError> for TaskFault {
    fn from(e: chainwatch_network::NetworkError) -> Self {
        Self::Network(e.to_string())
    }
}

impl From<chainwatch_store::StoreError> for TaskFault {
    fn from(e: chainwatch_store::StoreError) -> Self {
        Self::Store(e.to_string())
    }
}

impl From<chainwatch_chain::ChainError> for TaskFault {
    fn from(e: chainwatch_chain::ChainError) -> Self {
        Self::Chain(e.to_string())
    }
}

impl From<DecodeError> for TaskFault {
    fn from(e: DecodeError) -> Self {
        Self::Decode(e.to_string())
    }
}
