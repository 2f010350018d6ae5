//! API layer - HTTP endpoint handlers.

mod health;
mod messages;
mod metrics;
mod routes;

pub use health::{health, stats, HealthResponse, StatsResponse};
pub use messages::{
    broadcast_message, send_message, BroadcastMessageRequest, BroadcastMessageResponse,
    SendMessageRequest, SendMessageResponse, MAX_BROADCAST_RECIPIENTS,
};
pub use metrics::prometheus_metrics;
pub use routes::{api_routes, public_routes};
