//! Engagement Metrics
//!
//! Prometheus metrics for toggles, counter maintenance and feed ranking

use once_cell::sync::Lazy;
use prometheus::{
    register_histogram, register_int_counter_vec, Encoder, Histogram, IntCounterVec, TextEncoder,
};
use std::time::Duration;

static TOGGLE_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "engagement_toggle_total",
        "Engagement toggle operations by edge kind, action and outcome",
        &["kind", "action", "outcome"]
    )
    .expect("Failed to register engagement toggle metric")
});

static COUNTER_UNDERFLOW_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "engagement_counter_underflow_total",
        "Decrements clamped at zero (counter drift detected)",
        &["counter"]
    )
    .expect("Failed to register counter underflow metric")
});

static COUNTER_REPAIRED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "engagement_counter_repaired_total",
        "Counters corrected by reconciliation",
        &["counter"]
    )
    .expect("Failed to register counter repaired metric")
});

static FEED_RANKING_SECONDS: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "engagement_feed_ranking_seconds",
        "Time spent scoring and sorting feed candidates",
        vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]
    )
    .expect("Failed to register feed ranking duration metric")
});

/// Record a toggle outcome ("ok" or an error label)
pub fn record_toggle(kind: &str, action: &str, outcome: &str) {
    TOGGLE_TOTAL
        .with_label_values(&[kind, action, outcome])
        .inc();
}

pub fn record_counter_underflow(counter: &str) {
    COUNTER_UNDERFLOW_TOTAL.with_label_values(&[counter]).inc();
}

pub fn record_counter_repaired(counter: &str) {
    COUNTER_REPAIRED_TOTAL.with_label_values(&[counter]).inc();
}

pub fn record_feed_ranking(duration: Duration) {
    FEED_RANKING_SECONDS.observe(duration.as_secs_f64());
}

/// Encode the default registry in the Prometheus text format
pub fn render() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        tracing::warn!(error = %e, "Failed to encode metrics");
    }
    String::from_utf8(buffer).unwrap_or_default()
}
