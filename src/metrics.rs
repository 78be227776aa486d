// Prometheus metrics for the orchestration loop
//
// Collected in-process and rendered on demand via dump():
// - Request counts and durations (per status)
// - Model turns (per provider and outcome)
// - Tool dispatches (per tool and status) with latency histograms
// - Session connections

use lazy_static::lazy_static;
use prometheus::{
    CounterVec, Encoder, Histogram, HistogramVec, IntCounter, Registry, TextEncoder,
};
use std::sync::Arc;

lazy_static! {
    pub static ref REGISTRY: Arc<Registry> = Arc::new(Registry::new());

    // Request metrics
    pub static ref REQUESTS_TOTAL: CounterVec = CounterVec::new(
        prometheus::Opts::new("requests_total", "User requests processed by the loop"),
        &["status"]
    ).expect("Failed to create requests total metric");

    pub static ref REQUEST_DURATION_SECONDS: Histogram = Histogram::with_opts(
        prometheus::HistogramOpts::new("request_duration_seconds", "End-to-end request duration"),
    ).expect("Failed to create request duration metric");

    // Model turn metrics
    pub static ref MODEL_TURNS_TOTAL: CounterVec = CounterVec::new(
        prometheus::Opts::new("model_turns_total", "Model turns routed to providers"),
        &["provider", "outcome"]
    ).expect("Failed to create model turns metric");

    pub static ref PROVIDER_REQUEST_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        prometheus::HistogramOpts::new("provider_request_duration_seconds", "Provider completion latency"),
        &["provider"]
    ).expect("Failed to create provider duration metric");

    // Tool dispatch metrics
    pub static ref TOOL_DISPATCHES_TOTAL: CounterVec = CounterVec::new(
        prometheus::Opts::new("tool_dispatches_total", "Tool calls dispatched over the session"),
        &["tool_name", "status"]
    ).expect("Failed to create tool dispatches metric");

    pub static ref TOOL_DISPATCH_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        prometheus::HistogramOpts::new("tool_dispatch_duration_seconds", "Tool call round-trip latency"),
        &["tool_name"]
    ).expect("Failed to create tool dispatch duration metric");

    // Session metrics
    pub static ref SESSIONS_CONNECTED_TOTAL: IntCounter = IntCounter::new(
        "sessions_connected_total",
        "MCP sessions successfully connected"
    ).expect("Failed to create sessions connected metric");
}

/// Register all metrics - call once at startup
pub fn init() -> prometheus::Result<()> {
    REGISTRY.register(Box::new(REQUESTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(REQUEST_DURATION_SECONDS.clone()))?;
    REGISTRY.register(Box::new(MODEL_TURNS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(PROVIDER_REQUEST_DURATION_SECONDS.clone()))?;
    REGISTRY.register(Box::new(TOOL_DISPATCHES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(TOOL_DISPATCH_DURATION_SECONDS.clone()))?;
    REGISTRY.register(Box::new(SESSIONS_CONNECTED_TOTAL.clone()))?;
    Ok(())
}

/// Render the current metric values in the Prometheus text format
pub fn dump() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
