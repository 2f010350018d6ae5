//! Prometheus metrics for the delivery service.
//!
//! - Submission metrics (messages accepted/rejected, chunks enqueued)
//! - Delivery metrics (chunks delivered, dropped by reason, throttling retries)
//! - Queue metrics (active per-recipient queues, buffered chunks)
//! - Transport latency

mod helpers;

pub use helpers::{encode_metrics, DeliveryMetrics, QueueMetrics};

use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, register_int_gauge,
    HistogramVec, IntCounter, IntCounterVec, IntGauge,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "delivery";

lazy_static! {
    // ============================================================================
    // Submission Metrics
    // ============================================================================

    /// Messages accepted or rejected at submission, by kind ("send", "broadcast")
    pub static ref MESSAGES_SUBMITTED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_messages_submitted_total", METRIC_PREFIX),
        "Total messages submitted by producers",
        &["kind", "outcome"]
    ).unwrap();

    /// Chunks placed into per-recipient queues
    pub static ref CHUNKS_ENQUEUED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_chunks_enqueued_total", METRIC_PREFIX),
        "Total chunks enqueued for delivery"
    ).unwrap();

    // ============================================================================
    // Delivery Metrics
    // ============================================================================

    /// Chunks accepted by the transport
    pub static ref CHUNKS_DELIVERED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_chunks_delivered_total", METRIC_PREFIX),
        "Total chunks delivered by the transport"
    ).unwrap();

    /// Chunks dropped, by reason
    pub static ref CHUNKS_DROPPED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_chunks_dropped_total", METRIC_PREFIX),
        "Total chunks dropped without delivery",
        &["reason"]
    ).unwrap();

    /// Retries caused by platform throttling
    pub static ref THROTTLE_RETRIES_TOTAL: IntCounter = register_int_counter!(
        format!("{}_throttle_retries_total", METRIC_PREFIX),
        "Total retries after a throttling response"
    ).unwrap();

    /// Latency of a single physical send, by transport and result
    pub static ref SEND_ATTEMPT_LATENCY: HistogramVec = register_histogram_vec!(
        format!("{}_send_attempt_latency_seconds", METRIC_PREFIX),
        "Latency of a single transport send in seconds",
        &["transport", "result"],
        vec![0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    ).unwrap();

    // ============================================================================
    // Queue Metrics
    // ============================================================================

    /// Per-recipient queues currently registered
    pub static ref ACTIVE_QUEUES: IntGauge = register_int_gauge!(
        format!("{}_active_queues", METRIC_PREFIX),
        "Number of per-recipient dispatch queues currently alive"
    ).unwrap();

    /// Chunks buffered across all queues
    pub static ref PENDING_CHUNKS: IntGauge = register_int_gauge!(
        format!("{}_pending_chunks", METRIC_PREFIX),
        "Number of chunks waiting in dispatch queues"
    ).unwrap();
}
