//! Metrics module
//!
//! Prometheus metrics for emulator startups and in-process mock traffic.

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_histogram, Counter, CounterVec, Encoder,
    Histogram, TextEncoder,
};

lazy_static! {
    // Emulator metrics
    pub static ref EMULATOR_STARTS_TOTAL: CounterVec = register_counter_vec!(
        "s3_testbed_emulator_starts_total",
        "Emulator start attempts by outcome",
        &["outcome"]  // ready, timeout, already_running, exited, spawn_failed
    ).unwrap();

    pub static ref EMULATOR_STARTUP_SECONDS: Histogram = register_histogram!(
        "s3_testbed_emulator_startup_seconds",
        "Time from spawn until the emulator answered",
        vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    ).unwrap();

    pub static ref READINESS_PROBES_TOTAL: Counter = register_counter!(
        "s3_testbed_readiness_probes_total",
        "Readiness probes sent to the emulator endpoint"
    ).unwrap();

    // Mock context metrics
    pub static ref MOCK_REQUESTS_TOTAL: CounterVec = register_counter_vec!(
        "s3_testbed_mock_requests_total",
        "Requests answered by the in-process mock context",
        &["method", "status"]
    ).unwrap();
}

/// Record the outcome of an emulator start
pub fn record_emulator_start(outcome: &str) {
    EMULATOR_STARTS_TOTAL.with_label_values(&[outcome]).inc();
}

/// Record a request served by the mock context
pub fn record_mock_request(method: &str, status: u16) {
    let status = status.to_string();
    MOCK_REQUESTS_TOTAL
        .with_label_values(&[method, status.as_str()])
        .inc();
}

/// Render all registered metrics in the Prometheus text format
pub fn gather_text() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        tracing::warn!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
