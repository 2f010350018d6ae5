//! Retry policy around a single chunk's physical delivery.
//!
//! Only throttling is retried, and only when the platform says how long to
//! wait. Every other failure drops the chunk on the spot.

use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;

use crate::metrics::DeliveryMetrics;
use crate::transport::{SendResult, Transport, TransportError};

use super::lifecycle::StopSignal;
use super::Chunk;

/// Why a chunk was given up on.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DropReason {
    #[error("still throttled after {retries} retries")]
    RetriesExhausted {
        retries: u32,
        /// Retry-after the platform asked for on the final throttle
        last_wait: Option<Duration>,
    },

    #[error("throttled without a usable retry-after")]
    InvalidRetryAfter,

    #[error("transport failure: {0}")]
    Transport(TransportError),

    #[error("transport panicked")]
    TransportPanicked,

    #[error("consumer stopped before reaching the chunk")]
    ConsumerLost,

    #[error("dispatcher shutting down")]
    Shutdown,
}

impl DropReason {
    /// Metric label
    pub fn label(&self) -> &'static str {
        match self {
            DropReason::RetriesExhausted { .. } => "retries_exhausted",
            DropReason::InvalidRetryAfter => "invalid_retry_after",
            DropReason::Transport(_) => "transport",
            DropReason::TransportPanicked => "transport_panic",
            DropReason::ConsumerLost => "consumer_lost",
            DropReason::Shutdown => "shutdown",
        }
    }
}

/// Final result of delivering one chunk.
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryOutcome {
    Delivered { attempts: u32 },
    Dropped { attempts: u32, reason: DropReason },
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            DeliveryOutcome::Delivered { attempts } | DeliveryOutcome::Dropped { attempts, .. } => {
                *attempts
            }
        }
    }
}

/// Per-chunk retry bookkeeping; lives for one delivery sequence only.
#[derive(Debug, Clone, Default)]
pub struct RetryState {
    /// Physical sends performed so far
    pub attempts: u32,
    /// Retry-after from the most recent throttle
    pub last_wait: Option<Duration>,
}

impl RetryState {
    fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }
}

/// Throttling-aware retry policy.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt
    pub max_retries: u32,
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }

    /// Deliver `chunk`, retrying throttled sends after the advertised wait.
    ///
    /// The chunk is sent once plus at most `max_retries` more times. A raised
    /// `stop` signal interrupts a pending wait and drops the chunk.
    pub async fn attempt_deliver(
        &self,
        transport: &dyn Transport,
        chunk: &Chunk,
        stop: &mut StopSignal,
    ) -> DeliveryOutcome {
        let mut state = RetryState::default();

        loop {
            state.attempts += 1;
            let started = Instant::now();
            let result = transport.send(chunk).await;
            DeliveryMetrics::record_attempt(transport.name(), result_label(&result), started.elapsed());

            let wait = match result {
                SendResult::Delivered => {
                    return DeliveryOutcome::Delivered {
                        attempts: state.attempts,
                    };
                }
                SendResult::Failed(error) => {
                    return DeliveryOutcome::Dropped {
                        attempts: state.attempts,
                        reason: DropReason::Transport(error),
                    };
                }
                SendResult::Throttled { retry_after } => match retry_after {
                    Some(wait) if !wait.is_zero() => wait,
                    _ => {
                        return DeliveryOutcome::Dropped {
                            attempts: state.attempts,
                            reason: DropReason::InvalidRetryAfter,
                        };
                    }
                },
            };

            state.last_wait = Some(wait);
            if state.retries() >= self.max_retries {
                return DeliveryOutcome::Dropped {
                    attempts: state.attempts,
                    reason: DropReason::RetriesExhausted {
                        retries: state.retries(),
                        last_wait: state.last_wait,
                    },
                };
            }

            tracing::debug!(
                recipient = %chunk.key,
                message_id = %chunk.message_id,
                chunk = %chunk.position(),
                attempt = state.attempts,
                wait_ms = wait.as_millis() as u64,
                "Throttled by transport, backing off"
            );
            DeliveryMetrics::record_throttle_retry();

            if !stop.sleep(wait).await {
                return DeliveryOutcome::Dropped {
                    attempts: state.attempts,
                    reason: DropReason::Shutdown,
                };
            }
        }
    }
}

fn result_label(result: &SendResult) -> &'static str {
    match result {
        SendResult::Delivered => "delivered",
        SendResult::Throttled { .. } => "throttled",
        SendResult::Failed(_) => "failed",
    }
}
