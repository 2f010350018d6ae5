//! Metrics helper structs for convenient metric recording

use std::time::Duration;

use prometheus::{Encoder, TextEncoder};

use super::{
    ACTIVE_QUEUES, CHUNKS_DELIVERED_TOTAL, CHUNKS_DROPPED_TOTAL, CHUNKS_ENQUEUED_TOTAL,
    MESSAGES_SUBMITTED_TOTAL, PENDING_CHUNKS, SEND_ATTEMPT_LATENCY, THROTTLE_RETRIES_TOTAL,
};

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

/// Helper struct for recording delivery metrics
pub struct DeliveryMetrics;

impl DeliveryMetrics {
    /// Record a submission outcome
    pub fn record_submitted(kind: &str, accepted: bool) {
        let outcome = if accepted { "accepted" } else { "rejected" };
        MESSAGES_SUBMITTED_TOTAL
            .with_label_values(&[kind, outcome])
            .inc();
    }

    pub fn record_enqueued(count: usize) {
        CHUNKS_ENQUEUED_TOTAL.inc_by(count as u64);
    }

    pub fn record_delivered() {
        CHUNKS_DELIVERED_TOTAL.inc();
    }

    /// Record a dropped chunk
    pub fn record_dropped(reason: &str) {
        CHUNKS_DROPPED_TOTAL.with_label_values(&[reason]).inc();
    }

    pub fn record_throttle_retry() {
        THROTTLE_RETRIES_TOTAL.inc();
    }

    /// Record how long one transport call took
    pub fn record_attempt(transport: &str, result: &str, elapsed: Duration) {
        SEND_ATTEMPT_LATENCY
            .with_label_values(&[transport, result])
            .observe(elapsed.as_secs_f64());
    }
}

/// Helper struct for queue gauges
pub struct QueueMetrics;

impl QueueMetrics {
    /// Update gauges from a registry snapshot (call when scraping)
    pub fn set(active_queues: usize, pending_chunks: usize) {
        ACTIVE_QUEUES.set(active_queues as i64);
        PENDING_CHUNKS.set(pending_chunks as i64);
    }
}
