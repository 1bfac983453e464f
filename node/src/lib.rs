//! chainwatch listener: watches a blockchain network through two peers.
//!
//! The listener:
//! - Keeps a header chain in sync with a primary peer
//! - Relays transactions requested through a broadcast feed to a relay peer
//! - Tracks relayed transactions until the relay asks for them, rejects
//!   them, or their request expires
//! - Drives an external indexer as transactions and blocks arrive
//! - Runs chain-dependent work in order and everything else in parallel

pub mod bridge;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod listener;
pub mod logging;
pub mod metrics;
pub mod registry;
pub mod scheduler;
pub mod status;
pub mod tracing_spans;
pub mod wallets;

pub use bridge::EventBridge;
pub use config::ListenerConfig;
pub use dispatcher::Dispatcher;
pub use error::{ListenerError, TaskFault};
pub use listener::{Listener, ListenerDeps};
pub use logging::{init_logging, LogFormat};
pub use metrics::ListenerMetrics;
pub use registry::{BroadcastRegistry, TrackedTransaction};
pub use scheduler::{Lane, TaskFailure, TaskLog, TaskResult, TaskScheduler};
pub use status::{BroadcastStatusHook, NoopStatusHook};
pub use wallets::{extract_balances, WalletRuleSet};
