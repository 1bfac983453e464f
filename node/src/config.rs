//! Listener configuration with TOML file support.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use chainwatch_network::TcpConnector;
use chainwatch_types::NetworkId;

use crate::logging::LogFormat;
use crate::ListenerError;

/// Configuration for a chainwatch listener.
///
/// Can be loaded from a TOML file via [`ListenerConfig::from_toml_file`] or
/// built programmatically (e.g. for tests).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenerConfig {
    /// Which network the peers belong to. Selects genesis and magic.
    #[serde(default = "default_network")]
    pub network: NetworkId,

    /// `host:port` of the peer chain data is pulled from.
    #[serde(default = "default_peer")]
    pub primary_peer: String,

    /// `host:port` of the peer transactions are relayed to.
    #[serde(default = "default_peer")]
    pub relay_peer: String,

    /// User agent announced in the version handshake.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Seconds between keep-alive pings to both peers.
    #[serde(default = "default_keepalive_interval_secs")]
    pub keepalive_interval_secs: u64,

    /// Age in seconds after which a broadcast request is dropped.
    #[serde(default = "default_broadcast_ttl_secs")]
    pub broadcast_ttl_secs: u64,

    /// Number of task failures kept for inspection.
    #[serde(default = "default_failure_history")]
    pub failure_history: usize,

    /// How long `stop` waits for the in-flight ordered task.
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,

    /// Log format: "human" or "json".
    #[serde(default = "default_log_format")]
    pub log_format: String,

    /// Log level filter: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

// ── Serde default helpers ──────────────────────────────────────────────

fn default_network() -> NetworkId {
    NetworkId::Regtest
}

fn default_peer() -> String {
    format!("127.0.0.1:{}", NetworkId::Regtest.default_port())
}

fn default_user_agent() -> String {
    format!("/chainwatch:{}/", env!("CARGO_PKG_VERSION"))
}

fn default_keepalive_interval_secs() -> u64 {
    60
}

fn default_broadcast_ttl_secs() -> u64 {
    24 * 60 * 60
}

fn default_failure_history() -> usize {
    32
}

fn default_shutdown_timeout_secs() -> u64 {
    30
}

fn default_log_format() -> String {
    "human".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

// ── Impl ───────────────────────────────────────────────────────────────

impl ListenerConfig {
    /// Load configuration from a TOML file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ListenerError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ListenerError::Config(format!("{}: {e}", path.as_ref().display())))?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml_str(s: &str) -> Result<Self, ListenerError> {
        toml::from_str(s).map_err(|e| ListenerError::Config(e.to_string()))
    }

    /// Serialize the configuration to a TOML string.
    pub fn to_toml_string(&self) -> Result<String, ListenerError> {
        toml::to_string_pretty(self).map_err(|e| ListenerError::Config(e.to_string()))
    }

    /// A TCP connector for the configured primary and relay peers.
    pub fn connector(&self) -> TcpConnector {
        TcpConnector::new(self.primary_peer.clone(), self.relay_peer.clone())
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_interval_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// Parsed `log_format`; anything other than "json" is human output.
    pub fn log_format(&self) -> LogFormat {
        if self.log_format.eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Human
        }
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            network: default_network(),
            primary_peer: default_peer(),
            relay_peer: default_peer(),
            user_agent: default_user_agent(),
            keepalive_interval_secs: default_keepalive_interval_secs(),
            broadcast_ttl_secs: default_broadcast_ttl_secs(),
            failure_history: default_failure_history(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            log_format: default_log_format(),
            log_level: default_log_level(),
        }
    }
}
