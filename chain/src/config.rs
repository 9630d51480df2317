//! Top-level configuration for a Mikron node.
//!
//! This module aggregates configuration for:
//!
//! - persistent storage (`store`, RocksDB path and creation flags),
//! - network selection (`network`, which of test/beta/live this node runs),
//! - the gossip UDP listener (`gossip`),
//! - the bootstrap engine (`bootstrap`),
//! - voting/election tuning (`voting`),
//! - the metrics exporter (`metrics`, enable flag + listen address).
//!
//! The goal is a single `NodeConfig` struct that `main.rs` can construct
//! from defaults, a config file, or environment variables as needed.

use std::net::SocketAddr;

use crate::bootstrap::BootstrapConfig;
use crate::network::NetworkKind;
use crate::store::StoreConfig;

/// Address this node binds its UDP gossip socket to.
#[derive(Clone, Debug)]
pub struct GossipConfig {
    pub listen_addr: SocketAddr,
    pub keepalive_interval_secs: u64,
}

impl Default for GossipConfig {
    fn default() -> Self {
        GossipConfig {
            listen_addr: "0.0.0.0:7075".parse().expect("hard-coded gossip listen address should parse"),
            keepalive_interval_secs: 60,
        }
    }
}

/// A known peer to bootstrap from and gossip with at startup.
#[derive(Clone, Debug)]
pub struct PeerConfig {
    pub addr: SocketAddr,
}

/// Election/voting tuning (§4.10).
#[derive(Clone, Debug)]
pub struct VotingConfig {
    /// Fraction of total supply a winning candidate's tally must strictly
    /// exceed to confirm (§D: "configurable fraction, defaulting to 1/2").
    pub quorum_fraction: f64,
    pub sweep_interval_secs: u64,
}

impl Default for VotingConfig {
    fn default() -> Self {
        VotingConfig { quorum_fraction: 0.5, sweep_interval_secs: 1 }
    }
}

/// Configuration for the Prometheus metrics exporter.
#[derive(Clone, Debug)]
pub struct MetricsConfig {
    /// Whether to run a `/metrics` HTTP exporter.
    pub enabled: bool,
    /// Address to bind the metrics HTTP server to.
    pub listen_addr: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        let addr: SocketAddr = "127.0.0.1:9898".parse().expect("hard-coded metrics listen address should parse");
        Self { enabled: true, listen_addr: addr }
    }
}

/// Top-level configuration for a Mikron node.
#[derive(Clone, Debug)]
pub struct NodeConfig {
    pub network: NetworkKind,
    pub store: StoreConfig,
    pub gossip: GossipConfig,
    pub bootstrap: BootstrapConfig,
    pub bootstrap_peers: Vec<PeerConfig>,
    pub voting: VotingConfig,
    pub metrics: MetricsConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            network: NetworkKind::Test,
            store: StoreConfig::default(),
            gossip: GossipConfig::default(),
            bootstrap: BootstrapConfig::default(),
            bootstrap_peers: Vec::new(),
            voting: VotingConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}
