//! Mikron node library crate.
//!
//! This crate provides the building blocks for a delegated-voting
//! cryptocurrency node:
//!
//! - domain primitives (`numbers`) and the state-block model (`block`),
//! - network parameters and genesis/manna constants (`network`),
//! - manna inflation (`manna`),
//! - the transactional ledger store (`store`) and admission algorithm
//!   (`ledger`),
//! - the wire protocol (`wire`),
//! - votes (`vote`) and active elections (`elections`),
//! - the block processor and gap cache (`processor`),
//! - the gossip network (`gossip`) and bootstrap engine (`bootstrap`),
//! - Prometheus-based metrics (`metrics`),
//! - and top-level node configuration (`config`).
//!
//! The top-level binary composes these into a running node; other
//! programs (simulators, test harnesses) can use the library directly.

pub mod block;
pub mod bootstrap;
pub mod config;
pub mod elections;
pub mod gossip;
pub mod ledger;
pub mod manna;
pub mod metrics;
pub mod network;
pub mod numbers;
pub mod processor;
pub mod store;
pub mod vote;
pub mod wire;

pub use config::{MetricsConfig, NodeConfig};
pub use ledger::{AdmitCode, AdmitResult, Ledger};
pub use network::{NetworkKind, NetworkParams};
pub use store::{Store, StoreConfig, StoreError};
