//! Prometheus metrics for the fan-out pipeline.
//!
//! - Event metrics (received, matched)
//! - Record metrics (written by kind, failed materializations)
//! - Fan-out metrics (dispatches by target type, availability events,
//!   change feed lag)

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, Histogram, IntCounter,
    IntCounterVec, TextEncoder,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "beacon";

lazy_static! {
    // ============================================================================
    // Event Metrics
    // ============================================================================

    /// Total inbound events received
    pub static ref EVENTS_RECEIVED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_events_received_total", METRIC_PREFIX),
        "Total inbound events received"
    ).unwrap();

    /// Inbound events that matched at least one subscription
    pub static ref EVENTS_MATCHED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_events_matched_total", METRIC_PREFIX),
        "Inbound events that matched at least one subscription"
    ).unwrap();

    // ============================================================================
    // Record Metrics
    // ============================================================================

    /// Records written by kind
    pub static ref RECORDS_WRITTEN_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_records_written_total", METRIC_PREFIX),
        "Records materialized and written",
        &["kind"]
    ).unwrap();

    /// Failed subscription materializations
    pub static ref RECORDS_FAILED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_records_failed_total", METRIC_PREFIX),
        "Subscription materializations that failed"
    ).unwrap();

    // ============================================================================
    // Fan-out Metrics
    // ============================================================================

    /// Fan-out dispatches by target type
    pub static ref FANOUT_DISPATCHES_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_fanout_dispatches_total", METRIC_PREFIX),
        "Insert notifications dispatched by target type",
        &["target"]
    ).unwrap();

    /// Availability events published
    pub static ref AVAILABILITY_PUBLISHED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_availability_published_total", METRIC_PREFIX),
        "Availability events published to the outbound bus"
    ).unwrap();

    /// Availability events lost to batches that failed after retries
    pub static ref AVAILABILITY_FAILED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_availability_failed_total", METRIC_PREFIX),
        "Availability events in batches that failed after retries"
    ).unwrap();

    /// Insert notifications dropped because the change feed lagged
    pub static ref CHANGEFEED_LAGGED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_changefeed_lagged_total", METRIC_PREFIX),
        "Insert notifications dropped due to change feed lag"
    ).unwrap();

    /// Distribution of recipients per fan-out dispatch
    pub static ref FANOUT_RECIPIENTS: Histogram = register_histogram!(
        format!("{}_fanout_recipients", METRIC_PREFIX),
        "Recipients resolved per fan-out dispatch",
        vec![1.0, 5.0, 10.0, 50.0, 100.0, 500.0, 1000.0, 10000.0]
    ).unwrap();
}

/// Encode all registered metrics in the Prometheus text format.
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder.encode_to_string(&metric_families)
}
