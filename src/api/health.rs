//! Health check and statistics endpoints.

use axum::{extract::State, Json};
use serde::Serialize;

use crate::delivery::{DispatchQueueStats, DispatcherStatsSnapshot};
use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub accepting: bool,
    pub transport: String,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub delivery: DispatcherStatsSnapshot,
    pub queues: QueueSummary,
}

#[derive(Debug, Serialize)]
pub struct QueueSummary {
    pub active_queues: usize,
    pub active_consumers: usize,
    pub pending_chunks: usize,
    /// Per-recipient detail, busiest first
    pub recipients: Vec<DispatchQueueStats>,
}

/// Recipients listed in the stats response
const MAX_LISTED_QUEUES: usize = 50;

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let accepting = state.dispatcher.is_accepting();
    let status = if accepting { "healthy" } else { "shutting_down" };

    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        accepting,
        transport: state.settings.transport.backend.clone(),
    })
}

pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    let dispatcher = &state.dispatcher;

    let mut recipients = dispatcher.queue_stats();
    recipients.sort_by(|a, b| b.pending.cmp(&a.pending).then(a.key.cmp(&b.key)));
    recipients.truncate(MAX_LISTED_QUEUES);

    Json(StatsResponse {
        delivery: dispatcher.stats(),
        queues: QueueSummary {
            active_queues: dispatcher.active_queues(),
            active_consumers: dispatcher.active_consumers(),
            pending_chunks: dispatcher.total_pending(),
            recipients,
        },
    })
}
