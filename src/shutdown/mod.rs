//! Graceful shutdown handling for the delivery service.
//!
//! The HTTP server stops first (axum's graceful shutdown), so no new messages
//! arrive; then the dispatcher is asked to finish or abandon what is buffered
//! within a bounded time.

use std::time::Duration;

use tokio::signal;

use crate::config::DeliverySettings;
use crate::delivery::{DeliveryDispatcher, ShutdownMode, ShutdownResult};

/// Configuration for graceful shutdown behavior
#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    /// Time to wait for queues to drain (default: 10 seconds)
    pub drain_timeout: Duration,
    /// What consumers do with their backlog (default: drain it)
    pub mode: ShutdownMode,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            drain_timeout: Duration::from_secs(10),
            mode: ShutdownMode::Drain,
        }
    }
}

impl From<&DeliverySettings> for ShutdownConfig {
    fn from(settings: &DeliverySettings) -> Self {
        Self {
            drain_timeout: Duration::from_secs(settings.shutdown_timeout_seconds),
            ..Self::default()
        }
    }
}

/// Handles graceful shutdown of the delivery service
pub struct GracefulShutdown {
    dispatcher: DeliveryDispatcher,
    config: ShutdownConfig,
}

impl GracefulShutdown {
    pub fn new(dispatcher: DeliveryDispatcher) -> Self {
        Self::with_config(dispatcher, ShutdownConfig::default())
    }

    /// Create with custom configuration
    pub fn with_config(dispatcher: DeliveryDispatcher, config: ShutdownConfig) -> Self {
        Self { dispatcher, config }
    }

    /// Execute the shutdown sequence
    #[tracing::instrument(
        name = "graceful_shutdown",
        skip(self),
        fields(
            active_queues = self.dispatcher.active_queues(),
            pending_chunks = self.dispatcher.total_pending()
        )
    )]
    pub async fn execute(&self, reason: &str) -> ShutdownResult {
        tracing::info!(
            reason = %reason,
            mode = ?self.config.mode,
            drain_timeout_secs = self.config.drain_timeout.as_secs(),
            "Starting graceful shutdown"
        );

        let result = self
            .dispatcher
            .shutdown(self.config.mode, self.config.drain_timeout)
            .await;

        if result.drained {
            tracing::info!(
                duration_ms = result.duration.as_millis() as u64,
                "Graceful shutdown completed"
            );
        } else {
            tracing::warn!(
                remaining_chunks = result.remaining_chunks,
                active_consumers = result.active_consumers,
                duration_ms = result.duration.as_millis() as u64,
                "Graceful shutdown timed out"
            );
        }

        result
    }
}

/// Resolve on Ctrl+C or SIGTERM, returning which one arrived.
pub async fn wait_for_signal() -> &'static str {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => "ctrl_c",
        _ = terminate => "sigterm",
    }
}
