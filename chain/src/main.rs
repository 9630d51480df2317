// src/main.rs
//
// Mikron node binary: opens the store, brings up genesis, starts the
// Prometheus exporter, catches up via bootstrap against any configured
// peers, then runs the gossip/processor/election event loop until
// interrupted.

use std::sync::Arc;
use std::time::Instant;

use mikron::bootstrap::{self, BootstrapConfig};
use mikron::config::NodeConfig;
use mikron::elections::ElectionsTable;
use mikron::gossip::{self, GossipSocket, PeerTable};
use mikron::ledger::Ledger;
use mikron::metrics::{MetricsRegistry, run_prometheus_http_server};
use mikron::network::NetworkParams;
use mikron::numbers::{Hash, Signature, ShortTimestamp, Work};
use mikron::processor::{BlockProcessor, ProcessorEvent};
use mikron::store::{Store, StoreConfig};
use mikron::wire::Message;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()))
        .init();

    if let Err(err) = run_node().await {
        tracing::error!(%err, "fatal error");
        std::process::exit(1);
    }
}

async fn run_node() -> Result<(), String> {
    let cfg = NodeConfig::default();
    let params = NetworkParams::by_kind(cfg.network);

    let metrics = Arc::new(MetricsRegistry::new().map_err(|e| format!("failed to initialise metrics registry: {e}"))?);
    if cfg.metrics.enabled {
        let metrics_clone = metrics.clone();
        let addr = cfg.metrics.listen_addr;
        tokio::spawn(async move {
            if let Err(e) = run_prometheus_http_server(metrics_clone, addr).await {
                tracing::error!(error = %e, "metrics HTTP server error");
            }
        });
        tracing::info!(%addr, "metrics exporter listening");
    }

    let store = Store::open(&StoreConfig { path: cfg.store.path.clone(), create_if_missing: cfg.store.create_if_missing })
        .map_err(|e| format!("failed to open store at {}: {e}", cfg.store.path))?;

    let ledger = Ledger::new(&store, params);
    if ensure_genesis_bootstrapped(&ledger, &params)? {
        tracing::info!(account = ?params.genesis_account, "stamped genesis block");
    }

    let elections = ElectionsTable::new();
    let processor = BlockProcessor::new();
    processor.load_unchecked(&store).map_err(|e| format!("failed to load unchecked table: {e}"))?;
    let peers = PeerTable::new();

    let socket = gossip::GossipSocket::bind(cfg.gossip.listen_addr, params)
        .await
        .map_err(|e| format!("failed to bind gossip socket on {}: {e}", cfg.gossip.listen_addr))?;
    tracing::info!(addr = %socket.local_addr().map_err(|e| e.to_string())?, "gossip socket bound");

    let bootstrap_listener = TcpListener::bind(cfg.bootstrap.listen_addr)
        .await
        .map_err(|e| format!("failed to bind bootstrap listener on {}: {e}", cfg.bootstrap.listen_addr))?;
    tracing::info!(addr = %cfg.bootstrap.listen_addr, "bootstrap server listening");

    for peer in &cfg.bootstrap_peers {
        match run_bootstrap_attempt(peer.addr, cfg.bootstrap, params, &ledger, &elections, &processor).await {
            Ok(stats) => {
                metrics.node.bootstrap_blocks_pulled.inc_by(stats.blocks_pulled);
                metrics.node.bootstrap_blocks_pushed.inc_by(stats.blocks_pushed);
                metrics.node.bootstrap_frontiers_seen.set(stats.frontiers_seen as i64);
                tracing::info!(peer = %peer.addr, ?stats, "bootstrap attempt complete");
            }
            Err(e) => tracing::warn!(peer = %peer.addr, error = %e, "bootstrap attempt failed"),
        }
    }

    run_event_loop(&socket, &bootstrap_listener, &peers, &ledger, &elections, &processor, &metrics, &cfg).await
}

/// Writes the canonical genesis block if this is a fresh store. The
/// genesis block's signature is never checked by `ensure_genesis` (§9
/// "bring-up bypasses normal admission"), so no signing key is required.
fn ensure_genesis_bootstrapped(ledger: &Ledger<'_>, params: &NetworkParams) -> Result<bool, String> {
    let genesis = mikron::block::StateBlock {
        account: params.genesis_account,
        creation_time: params.manna_start_time,
        previous: Hash::ZERO,
        representative: params.genesis_account,
        balance: params.genesis_amount,
        link: Hash::ZERO,
        signature: Signature::ZERO,
        work: Work(0),
    };
    ledger.ensure_genesis(&genesis).map_err(|e| e.to_string())
}

async fn run_bootstrap_attempt(
    addr: std::net::SocketAddr,
    config: BootstrapConfig,
    params: NetworkParams,
    ledger: &Ledger<'_>,
    elections: &ElectionsTable,
    processor: &BlockProcessor,
) -> std::io::Result<bootstrap::BootstrapStats> {
    bootstrap::run_attempt(addr, config, params, ledger, elections, processor).await
}

/// The gossip/processor/election loop. Runs as a single task: `Ledger`
/// borrows the store for its lifetime, so spawning it across independent
/// tokio tasks would fight the borrow checker for no real benefit at this
/// node's traffic scale. `tokio::select!` multiplexes socket reads against
/// two tickers instead.
async fn run_event_loop(
    socket: &GossipSocket,
    bootstrap_listener: &TcpListener,
    peers: &PeerTable,
    ledger: &Ledger<'_>,
    elections: &ElectionsTable,
    processor: &BlockProcessor,
    metrics: &MetricsRegistry,
    cfg: &NodeConfig,
) -> Result<(), String> {
    let mut keepalive_tick = tokio::time::interval(std::time::Duration::from_secs(cfg.gossip.keepalive_interval_secs));
    let mut flush_tick = tokio::time::interval(std::time::Duration::from_millis(200));
    let mut sweep_tick = tokio::time::interval(std::time::Duration::from_secs(cfg.voting.sweep_interval_secs));

    let total_supply = ledger.params.genesis_amount;
    let quorum = mikron::numbers::Amount((total_supply.0 as f64 * cfg.voting.quorum_fraction) as u64);

    loop {
        tokio::select! {
            biased;

            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown requested, exiting event loop");
                return Ok(());
            }

            result = socket.recv(peers) => {
                match result {
                    Ok((from, Ok(message))) => handle_message(from, message, socket, peers, ledger, elections, processor, metrics).await,
                    Ok((from, Err(status))) => tracing::debug!(%from, ?status, "dropped malformed datagram"),
                    Err(e) => tracing::warn!(error = %e, "gossip socket read error"),
                }
            }

            result = bootstrap_listener.accept() => {
                match result {
                    Ok((stream, from)) => {
                        if let Err(e) = bootstrap::serve_bootstrap_connection(stream, ledger.params, ledger, elections, processor).await {
                            tracing::debug!(%from, error = %e, "bootstrap connection closed with error");
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "bootstrap listener accept error"),
                }
            }

            _ = keepalive_tick.tick() => {
                if let Err(e) = socket.flood_keepalive(peers).await {
                    tracing::warn!(error = %e, "keepalive flood failed");
                }
                metrics.node.gossip_peer_count.set(peers.peer_count() as i64);
            }

            _ = flush_tick.tick() => {
                match processor.flush(ledger, elections) {
                    Ok(events) => {
                        for event in &events {
                            if let ProcessorEvent::Progress(hash) = event {
                                metrics.node.processor_progress_total.inc();
                                if let Ok(Some(block)) = read_block(ledger, *hash) {
                                    if let Err(e) = socket.republish_block(peers, &block).await {
                                        tracing::warn!(error = %e, "republish failed");
                                    }
                                }
                            } else if let ProcessorEvent::Dropped(_, _) = event {
                                metrics.node.processor_dropped_total.inc();
                            }
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "processor flush failed"),
                }
                metrics.node.processor_queue_depth.set(processor.queue_depth() as i64);
                metrics.node.processor_gap_cache_len.set(processor.gap_cache_len() as i64);
            }

            _ = sweep_tick.tick() => {
                let confirmed = elections.sweep_confirmations(quorum);
                for (root, winner) in confirmed {
                    tracing::info!(?root, ?winner, "election confirmed");
                    metrics.node.elections_confirmed_total.inc();
                }
                metrics.node.elections_active.set(elections.active_root_count() as i64);
            }
        }
    }
}

async fn handle_message(
    from: std::net::SocketAddr,
    message: Message,
    _socket: &GossipSocket,
    peers: &PeerTable,
    ledger: &Ledger<'_>,
    elections: &ElectionsTable,
    processor: &BlockProcessor,
    _metrics: &MetricsRegistry,
) {
    match message {
        Message::Publish(p) => {
            processor.enqueue(p.block, Instant::now());
        }
        Message::ConfirmReq(c) => {
            processor.enqueue(c.block, Instant::now());
        }
        Message::ConfirmAck(c) => {
            let txn = ledger.store().begin_write();
            match c.vote.ingest(&txn) {
                Ok(mikron::vote::VoteCode::Vote) => {
                    let weight_of = |account: mikron::numbers::Account| txn.get_representation(account).unwrap_or(mikron::numbers::Amount::ZERO);
                    elections.apply_vote(&c.vote, weight_of);
                    if let Err(e) = txn.commit() {
                        tracing::warn!(error = %e, "failed to commit vote");
                    }
                }
                Ok(other) => {
                    txn.abort();
                    tracing::debug!(%from, ?other, "vote not accepted");
                }
                Err(e) => {
                    txn.abort();
                    tracing::warn!(%from, error = %e, "vote ingestion error");
                }
            }
        }
        Message::Keepalive(k) => {
            for peer in &k.peers {
                if peer.is_unspecified() {
                    continue;
                }
                if let Some(addr) = peer_addr_to_socket_addr(peer) {
                    peers.observed(addr, 0);
                }
            }
        }
        _ => {
            // Bootstrap-side requests (frontier_req, bulk_pull, bulk_push,
            // node_id_handshake) arrive over the TCP bootstrap listener,
            // not the UDP gossip socket; nothing to do here.
        }
    }
}

fn read_block(ledger: &Ledger<'_>, hash: Hash) -> Result<Option<mikron::block::StateBlock>, String> {
    let txn = ledger.store().begin_read();
    txn.get_state_block(hash).map_err(|e| e.to_string())
}
