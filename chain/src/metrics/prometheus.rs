//! Prometheus-backed metrics and HTTP exporter.
//!
//! This module defines a [`MetricsRegistry`] that owns a Prometheus
//! registry and a set of strongly-typed node metrics, and an async HTTP
//! exporter that serves `/metrics` using `hyper`.

use std::{convert::Infallible, net::SocketAddr, sync::Arc};

use bytes::Bytes;
use http_body_util::Full;
use hyper::{
    Method, Request, Response, StatusCode, body::Incoming, header, server::conn::http1,
    service::service_fn,
};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;

use prometheus::{self, Encoder, Gauge, IntCounter, IntGauge, Opts, Registry, TextEncoder};

/// Node-wide Prometheus metrics: gossip, bootstrap, elections, and the
/// block processor each get a handful of gauges/counters (§A "extended
/// with gauges/counters for the new subsystems").
#[derive(Clone)]
pub struct NodeMetrics {
    /// Number of peers currently tracked by the gossip peer table.
    pub gossip_peer_count: IntGauge,
    /// Total blocks received via bulk pull across all bootstrap attempts.
    pub bootstrap_blocks_pulled: IntCounter,
    /// Total blocks pushed to peers during bulk push.
    pub bootstrap_blocks_pushed: IntCounter,
    /// Frontiers seen in the most recent bootstrap attempt's frontier request.
    pub bootstrap_frontiers_seen: IntGauge,
    /// Number of currently active (unconfirmed) elections.
    pub elections_active: IntGauge,
    /// Total elections confirmed since process start.
    pub elections_confirmed_total: IntCounter,
    /// Current stake-weighted tally of the winning candidate, normalized
    /// 0..1 against total known supply, for the most recently confirmed
    /// election.
    pub elections_last_winner_tally_ratio: Gauge,
    /// Number of blocks currently queued awaiting processor admission.
    pub processor_queue_depth: IntGauge,
    /// Number of blocks currently parked in the gap cache.
    pub processor_gap_cache_len: IntGauge,
    /// Total blocks admitted (`progress`) by the processor.
    pub processor_progress_total: IntCounter,
    /// Total blocks dropped by the processor for any reason other than a
    /// gap or a fork.
    pub processor_dropped_total: IntCounter,
}

impl NodeMetrics {
    /// Registers node metrics into the given `Registry`.
    pub fn register(registry: &Registry) -> Result<Self, prometheus::Error> {
        let gossip_peer_count = IntGauge::with_opts(Opts::new("gossip_peer_count", "Peers currently tracked by the gossip peer table"))?;
        registry.register(Box::new(gossip_peer_count.clone()))?;

        let bootstrap_blocks_pulled = IntCounter::with_opts(Opts::new("bootstrap_blocks_pulled_total", "Total blocks received via bulk pull"))?;
        registry.register(Box::new(bootstrap_blocks_pulled.clone()))?;

        let bootstrap_blocks_pushed = IntCounter::with_opts(Opts::new("bootstrap_blocks_pushed_total", "Total blocks pushed during bulk push"))?;
        registry.register(Box::new(bootstrap_blocks_pushed.clone()))?;

        let bootstrap_frontiers_seen = IntGauge::with_opts(Opts::new("bootstrap_frontiers_seen", "Frontiers seen in the most recent bootstrap attempt"))?;
        registry.register(Box::new(bootstrap_frontiers_seen.clone()))?;

        let elections_active = IntGauge::with_opts(Opts::new("elections_active", "Number of currently active elections"))?;
        registry.register(Box::new(elections_active.clone()))?;

        let elections_confirmed_total = IntCounter::with_opts(Opts::new("elections_confirmed_total", "Total elections confirmed since process start"))?;
        registry.register(Box::new(elections_confirmed_total.clone()))?;

        let elections_last_winner_tally_ratio = Gauge::with_opts(Opts::new(
            "elections_last_winner_tally_ratio",
            "Winning candidate's tally as a fraction of total supply, for the most recently confirmed election",
        ))?;
        registry.register(Box::new(elections_last_winner_tally_ratio.clone()))?;

        let processor_queue_depth = IntGauge::with_opts(Opts::new("processor_queue_depth", "Blocks currently queued awaiting processor admission"))?;
        registry.register(Box::new(processor_queue_depth.clone()))?;

        let processor_gap_cache_len = IntGauge::with_opts(Opts::new("processor_gap_cache_len", "Blocks currently parked in the gap cache"))?;
        registry.register(Box::new(processor_gap_cache_len.clone()))?;

        let processor_progress_total = IntCounter::with_opts(Opts::new("processor_progress_total", "Total blocks admitted by the processor"))?;
        registry.register(Box::new(processor_progress_total.clone()))?;

        let processor_dropped_total = IntCounter::with_opts(Opts::new("processor_dropped_total", "Total blocks dropped by the processor"))?;
        registry.register(Box::new(processor_dropped_total.clone()))?;

        Ok(Self {
            gossip_peer_count,
            bootstrap_blocks_pulled,
            bootstrap_blocks_pushed,
            bootstrap_frontiers_seen,
            elections_active,
            elections_confirmed_total,
            elections_last_winner_tally_ratio,
            processor_queue_depth,
            processor_gap_cache_len,
            processor_progress_total,
            processor_dropped_total,
        })
    }
}

/// Wrapper around a Prometheus registry and the node metrics. This is the
/// main handle passed around the node; wrap in an [`Arc`] and share across
/// tasks.
#[derive(Clone)]
pub struct MetricsRegistry {
    registry: Registry,
    pub node: NodeMetrics,
}

impl MetricsRegistry {
    /// Creates a new `MetricsRegistry` with a fresh underlying `Registry`
    /// and registers the node metrics.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("mikron".to_string()), None)?;
        let node = NodeMetrics::register(&registry)?;
        Ok(Self { registry, node })
    }

    /// Encodes all metrics in this registry into the Prometheus text format.
    pub fn gather_text(&self) -> String {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            tracing::warn!(error = %e, "failed to encode Prometheus metrics");
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

/// Runs an HTTP server that exposes Prometheus metrics.
///
/// The server listens on `addr` and serves `GET /metrics` with the
/// Prometheus text exposition format. All other paths return 404.
pub async fn run_prometheus_http_server(
    metrics: Arc<MetricsRegistry>,
    addr: SocketAddr,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = TcpListener::bind(addr).await?;

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let metrics = metrics.clone();

        tokio::spawn(async move {
            let svc = service_fn(move |req| {
                let metrics = metrics.clone();
                handle_request(req, metrics)
            });

            if let Err(err) = http1::Builder::new().serve_connection(io, svc).await {
                tracing::warn!(error = %err, "prometheus HTTP server error");
            }
        });
    }
}

async fn handle_request(
    req: Request<Incoming>,
    metrics: Arc<MetricsRegistry>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => {
            let body = metrics.gather_text();
            Ok(Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, "text/plain; version=0.0.4")
                .body(Full::new(Bytes::from(body)))
                .unwrap())
        }
        _ => Ok(Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Full::new(Bytes::from("not found")))
            .unwrap()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::Registry;

    #[test]
    fn node_metrics_register_and_record() {
        let registry = Registry::new();
        let metrics = NodeMetrics::register(&registry).expect("register metrics");

        metrics.gossip_peer_count.set(3);
        metrics.bootstrap_blocks_pulled.inc_by(10);
        metrics.elections_active.set(1);
        metrics.elections_last_winner_tally_ratio.set(0.6);
        metrics.processor_queue_depth.set(2);

        let metric_families = registry.gather();
        assert!(!metric_families.is_empty());
    }

    #[test]
    fn metrics_registry_gather_text_works() {
        let registry = MetricsRegistry::new().expect("create metrics registry");
        registry.node.gossip_peer_count.set(5);
        let text = registry.gather_text();
        assert!(text.contains("gossip_peer_count"));
    }
}
