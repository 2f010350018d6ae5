//! Shutdown modes and the stop signal observed by consumers.

use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;

/// How in-flight consumers react to shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownMode {
    /// Keep delivering everything already buffered
    Drain,
    /// Finish the current chunk, drop the rest of each backlog
    StopAfterCurrent,
}

/// Outcome of [`DeliveryDispatcher::shutdown`](super::DeliveryDispatcher::shutdown).
#[derive(Debug, Clone, Default, Serialize)]
pub struct ShutdownResult {
    /// Every queue finished before the timeout
    pub drained: bool,
    /// Chunks still buffered when the wait ended
    pub remaining_chunks: usize,
    /// Consumers still running when the wait ended
    pub active_consumers: usize,
    #[serde(serialize_with = "serialize_duration_ms")]
    pub duration: Duration,
}

fn serialize_duration_ms<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

/// Receiving side of the stop signal; cheap to clone, one per consumer.
#[derive(Debug, Clone)]
pub struct StopSignal {
    rx: watch::Receiver<bool>,
}

impl StopSignal {
    /// Create a signal together with the sender that raises it.
    pub fn channel() -> (watch::Sender<bool>, Self) {
        let (tx, rx) = watch::channel(false);
        (tx, Self { rx })
    }

    /// A signal that is never raised.
    pub fn never() -> Self {
        Self::channel().1
    }

    pub fn is_raised(&self) -> bool {
        *self.rx.borrow()
    }

    /// Sleep for `duration` unless the signal is raised first.
    ///
    /// Returns `false` if the sleep was cut short.
    pub async fn sleep(&mut self, duration: Duration) -> bool {
        if self.is_raised() {
            return false;
        }
        if duration.is_zero() {
            return true;
        }

        let sleep = tokio::time::sleep(duration);
        tokio::pin!(sleep);

        let raised = tokio::select! {
            _ = &mut sleep => return true,
            raised = wait_raised(&mut self.rx) => raised,
        };
        if raised {
            return false;
        }

        // Sender dropped without raising: nothing can interrupt us any more.
        sleep.await;
        true
    }
}

async fn wait_raised(rx: &mut watch::Receiver<bool>) -> bool {
    rx.wait_for(|raised| *raised).await.is_ok()
}
