//! Prometheus metrics
//!
//! Counters and gauges covering the fetch path: provider calls, quota
//! decisions, circuit breaker state, dedup merges, and cache traffic.
//! Exposed over a small hyper server at /metrics.

use once_cell::sync::Lazy;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge_vec, HistogramOpts,
    HistogramVec, IntCounterVec, IntGaugeVec, TextEncoder,
};
use prometheus::Encoder;
use tracing::{error, info};

use crate::breaker::CircuitState;

static FETCHES: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "newswire_fetches_total",
        "Upstream fetch attempts by provider and outcome",
        &["provider", "outcome"]
    )
    .expect("Failed to create fetches metric")
});

static ARTICLES_INGESTED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "newswire_articles_ingested_total",
        "Articles normalized per provider",
        &["provider"]
    )
    .expect("Failed to create articles_ingested metric")
});

static QUOTA_DECISIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "newswire_quota_decisions_total",
        "Quota admission decisions by provider and outcome",
        &["provider", "outcome"]
    )
    .expect("Failed to create quota_decisions metric")
});

static DEDUP_PAIRS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "newswire_dedup_pairs_total",
        "Duplicate pairs merged by detection method",
        &["method"]
    )
    .expect("Failed to create dedup_pairs metric")
});

static CACHE_REQUESTS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "newswire_cache_requests_total",
        "Cache lookups by category and result",
        &["category", "result"]
    )
    .expect("Failed to create cache_requests metric")
});

static BREAKER_STATE: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "newswire_circuit_state",
        "Circuit breaker state per provider (0=closed, 1=open, 2=half-open)",
        &["provider"]
    )
    .expect("Failed to create circuit_state metric")
});

static FETCH_LATENCY: Lazy<HistogramVec> = Lazy::new(|| {
    let buckets = vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0];
    register_histogram_vec!(
        HistogramOpts::new(
            "newswire_fetch_latency_seconds",
            "Latency of provider fetches in seconds"
        )
        .buckets(buckets),
        &["provider"]
    )
    .expect("Failed to create fetch_latency metric")
});

pub fn record_fetch_success(provider: &str, articles: u64) {
    FETCHES.with_label_values(&[provider, "success"]).inc();
    ARTICLES_INGESTED
        .with_label_values(&[provider])
        .inc_by(articles);
}

pub fn record_fetch_failure(provider: &str) {
    FETCHES.with_label_values(&[provider, "failure"]).inc();
}

pub fn record_quota_decision(provider: &str, granted: bool) {
    let outcome = if granted { "granted" } else { "denied" };
    QUOTA_DECISIONS.with_label_values(&[provider, outcome]).inc();
}

pub fn record_dedup_pairs(method: &str, count: u64) {
    DEDUP_PAIRS.with_label_values(&[method]).inc_by(count);
}

pub fn record_cache_hit(category: &str) {
    CACHE_REQUESTS.with_label_values(&[category, "hit"]).inc();
}

pub fn record_cache_miss(category: &str) {
    CACHE_REQUESTS.with_label_values(&[category, "miss"]).inc();
}

pub fn set_breaker_state(provider: &str, state: CircuitState) {
    let value = match state {
        CircuitState::Closed => 0,
        CircuitState::Open => 1,
        CircuitState::HalfOpen => 2,
    };
    BREAKER_STATE.with_label_values(&[provider]).set(value);
}

pub fn record_fetch_latency(provider: &str, latency_secs: f64) {
    FETCH_LATENCY
        .with_label_values(&[provider])
        .observe(latency_secs);
}

/// Timer that records fetch latency on drop.
pub struct FetchTimer {
    provider: String,
    start: std::time::Instant,
}

impl FetchTimer {
    pub fn new(provider: &str) -> Self {
        Self {
            provider: provider.to_string(),
            start: std::time::Instant::now(),
        }
    }
}

impl Drop for FetchTimer {
    fn drop(&mut self) {
        record_fetch_latency(&self.provider, self.start.elapsed().as_secs_f64());
    }
}

/// Collects all metrics as Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return String::new();
    }

    String::from_utf8(buffer).unwrap_or_default()
}

use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::{server::conn::http1, service::service_fn, Request, Response};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use tokio::net::TcpListener;

async fn handle_metrics(_req: Request<Incoming>) -> Result<Response<Full<Bytes>>, Infallible> {
    let metrics = gather_metrics();
    Ok(Response::new(Full::new(Bytes::from(metrics))))
}

/// Starts the metrics HTTP server.
pub async fn start_metrics_server(addr: SocketAddr) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(address = %addr, "Metrics server listening");

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);

        tokio::spawn(async move {
            if let Err(e) = http1::Builder::new()
                .serve_connection(io, service_fn(handle_metrics))
                .await
            {
                error!(error = %e, "Error serving metrics connection");
            }
        });
    }
}
