//! Prometheus-backed metrics and HTTP exporter.
//!
//! This module defines a [`MetricsRegistry`] that owns a Prometheus
//! registry and a set of strongly-typed ledger metrics, and an async HTTP
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

use prometheus::{
    self, Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

use crate::error::ProcessCode;

/// Ledger-related Prometheus metrics.
///
/// These are registered into a [`Registry`] and updated from the block
/// processor, active engine, vote generator, and request aggregator.
#[derive(Clone)]
pub struct LedgerMetrics {
    /// Blocks handled by [`crate::ledger::Ledger::process`], labeled by
    /// [`ProcessCode::as_str`].
    pub blocks_processed: IntCounterVec,
    /// Wall-clock time spent in [`crate::block_processor::BlockProcessor::drain_batch`].
    pub block_processor_batch_seconds: Histogram,
    /// Elections currently tracked by the active engine.
    pub elections_active: IntGauge,
    /// Elections confirmed since startup.
    pub elections_confirmed: IntCounter,
    /// Elections dropped to make room under `max_active_elections`.
    pub elections_dropped: IntCounter,
    /// Elections that hit their TTL without confirming.
    pub elections_expired: IntCounter,
    /// Votes this node has generated and flooded.
    pub votes_generated: IntCounter,
    /// Votes served out of the recent-vote cache rather than regenerated.
    pub votes_cache_hits: IntCounter,
    /// `confirm_req` requests served, labeled by outcome.
    pub aggregator_requests: IntCounterVec,
}

impl LedgerMetrics {
    /// Registers ledger metrics into the given `Registry`.
    pub fn register(registry: &Registry) -> Result<Self, prometheus::Error> {
        let blocks_processed = IntCounterVec::new(
            Opts::new(
                "ledger_blocks_processed_total",
                "Blocks processed by Ledger::process, labeled by result code",
            ),
            &["code"],
        )?;
        registry.register(Box::new(blocks_processed.clone()))?;

        let block_processor_batch_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "ledger_block_processor_batch_seconds",
                "Time to drain and process one block processor batch, in seconds",
            )
            .buckets(vec![
                0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0,
            ]),
        )?;
        registry.register(Box::new(block_processor_batch_seconds.clone()))?;

        let elections_active = IntGauge::with_opts(Opts::new(
            "ledger_elections_active",
            "Number of elections currently tracked by the active engine",
        ))?;
        registry.register(Box::new(elections_active.clone()))?;

        let elections_confirmed = IntCounter::with_opts(Opts::new(
            "ledger_elections_confirmed_total",
            "Total number of elections confirmed",
        ))?;
        registry.register(Box::new(elections_confirmed.clone()))?;

        let elections_dropped = IntCounter::with_opts(Opts::new(
            "ledger_elections_dropped_total",
            "Total number of elections evicted under active-election capacity pressure",
        ))?;
        registry.register(Box::new(elections_dropped.clone()))?;

        let elections_expired = IntCounter::with_opts(Opts::new(
            "ledger_elections_expired_total",
            "Total number of elections that reached their TTL without confirming",
        ))?;
        registry.register(Box::new(elections_expired.clone()))?;

        let votes_generated = IntCounter::with_opts(Opts::new(
            "ledger_votes_generated_total",
            "Total number of votes produced by the local vote generator",
        ))?;
        registry.register(Box::new(votes_generated.clone()))?;

        let votes_cache_hits = IntCounter::with_opts(Opts::new(
            "ledger_votes_cache_hits_total",
            "Total number of confirm_req requests served from the recent-vote cache",
        ))?;
        registry.register(Box::new(votes_cache_hits.clone()))?;

        let aggregator_requests = IntCounterVec::new(
            Opts::new(
                "ledger_aggregator_requests_total",
                "Requests handled by the request aggregator, labeled by outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(aggregator_requests.clone()))?;

        Ok(Self {
            blocks_processed,
            block_processor_batch_seconds,
            elections_active,
            elections_confirmed,
            elections_dropped,
            elections_expired,
            votes_generated,
            votes_cache_hits,
            aggregator_requests,
        })
    }

    /// Increments [`Self::blocks_processed`] for `code`.
    pub fn record_process_result(&self, code: ProcessCode) {
        self.blocks_processed.with_label_values(&[code.as_str()]).inc();
    }
}

/// Wrapper around a Prometheus registry and the ledger metrics.
///
/// This is the main handle you pass around in the node. It can be wrapped
/// in an [`Arc`] and shared across threads/tasks.
#[derive(Clone)]
pub struct MetricsRegistry {
    registry: Registry,
    pub ledger: LedgerMetrics,
}

impl MetricsRegistry {
    /// Creates a new `MetricsRegistry` with a fresh underlying `Registry`
    /// and registers the ledger metrics.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("chain".to_string()), None)?;
        let ledger = LedgerMetrics::register(&registry)?;
        Ok(Self { registry, ledger })
    }

    /// Encodes all metrics in this registry into the Prometheus text format.
    pub fn gather_text(&self) -> String {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            eprintln!("failed to encode Prometheus metrics: {e}");
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

/// Runs an HTTP server that exposes Prometheus metrics.
///
/// The server listens on `addr` and serves `GET /metrics` with the
/// Prometheus text exposition format. All other paths return 404.
///
/// This function is `async` and is intended to be spawned onto a Tokio
/// runtime, e.g.:
///
/// ```ignore
/// let registry = Arc::new(MetricsRegistry::new()?);
/// let addr: SocketAddr = "127.0.0.1:9898".parse()?;
/// tokio::spawn(run_prometheus_http_server(registry.clone(), addr));
/// ```
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
                eprintln!("prometheus HTTP server error: {err}");
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
