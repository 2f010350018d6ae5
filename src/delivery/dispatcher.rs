use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde::Serialize;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::time::Instant;
use uuid::Uuid;

use crate::config::DeliverySettings;
use crate::metrics::DeliveryMetrics;
use crate::transport::Transport;

use super::lifecycle::{ShutdownMode, ShutdownResult, StopSignal};
use super::queue::{DispatchQueue, DispatchQueueStats};
use super::registry::QueueRegistry;
use super::retry::{DeliveryOutcome, DropReason, RetryPolicy};
use super::{Chunk, InteractivePayload, OutboundMessage, RecipientKey};

/// How often shutdown re-checks whether all queues are gone
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Tuning for the dispatcher
#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    /// Longest chunk handed to the transport, in characters
    pub max_chunk_length: usize,
    /// Minimum spacing between consecutive sends to one recipient
    pub min_delay_between_sends: Duration,
    /// Retries allowed for a throttled chunk
    pub max_retries: u32,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self::from(&DeliverySettings::default())
    }
}

impl From<&DeliverySettings> for DeliveryConfig {
    fn from(settings: &DeliverySettings) -> Self {
        Self {
            max_chunk_length: settings.max_chunk_length,
            min_delay_between_sends: Duration::from_millis(settings.min_delay_between_sends_ms),
            max_retries: settings.max_retries,
        }
    }
}

/// Submission rejected before anything was enqueued.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("dispatcher is shutting down")]
    ShuttingDown,

    #[error("message text is empty")]
    EmptyMessage,
}

/// Acknowledgement that a message was accepted for delivery.
#[derive(Debug, Clone, Serialize)]
pub struct SendReceipt {
    pub message_id: Uuid,
    pub key: RecipientKey,
    /// Number of chunks the message was split into
    pub chunks: usize,
}

/// A broadcast recipient whose submission was rejected
#[derive(Debug, Clone, Serialize)]
pub struct BroadcastRejection {
    pub key: RecipientKey,
    pub reason: String,
}

/// Result of [`DeliveryDispatcher::broadcast`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct BroadcastReceipt {
    pub accepted: Vec<SendReceipt>,
    pub rejected: Vec<BroadcastRejection>,
}

impl BroadcastReceipt {
    pub fn total_chunks(&self) -> usize {
        self.accepted.iter().map(|r| r.chunks).sum()
    }
}

/// Statistics for the delivery dispatcher
#[derive(Debug, Default)]
pub struct DispatcherStats {
    /// Messages accepted for delivery
    pub messages_accepted: AtomicU64,
    /// Messages rejected at submission
    pub messages_rejected: AtomicU64,
    /// Chunks placed into queues
    pub chunks_enqueued: AtomicU64,
    /// Chunks the transport accepted
    pub chunks_delivered: AtomicU64,
    /// Chunks given up on
    pub chunks_dropped: AtomicU64,
    /// Extra sends caused by throttling
    pub throttle_retries: AtomicU64,
    /// Broadcast requests
    pub broadcasts: AtomicU64,
}

impl DispatcherStats {
    pub fn snapshot(&self) -> DispatcherStatsSnapshot {
        DispatcherStatsSnapshot {
            messages_accepted: self.messages_accepted.load(Ordering::Relaxed),
            messages_rejected: self.messages_rejected.load(Ordering::Relaxed),
            chunks_enqueued: self.chunks_enqueued.load(Ordering::Relaxed),
            chunks_delivered: self.chunks_delivered.load(Ordering::Relaxed),
            chunks_dropped: self.chunks_dropped.load(Ordering::Relaxed),
            throttle_retries: self.throttle_retries.load(Ordering::Relaxed),
            broadcasts: self.broadcasts.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of dispatcher statistics
#[derive(Debug, Clone, Serialize)]
pub struct DispatcherStatsSnapshot {
    pub messages_accepted: u64,
    pub messages_rejected: u64,
    pub chunks_enqueued: u64,
    pub chunks_delivered: u64,
    pub chunks_dropped: u64,
    pub throttle_retries: u64,
    pub broadcasts: u64,
}

struct Shared {
    config: DeliveryConfig,
    registry: QueueRegistry,
    transport: Arc<dyn Transport>,
    retry: RetryPolicy,
    stats: DispatcherStats,
    accepting: AtomicBool,
    active_consumers: AtomicUsize,
    stop_tx: watch::Sender<bool>,
    stop: StopSignal,
    runtime: Handle,
}

/// Entry point for producers: splits messages and feeds per-recipient queues.
///
/// Cloning is cheap; all clones share the same queues.
#[derive(Clone)]
pub struct DeliveryDispatcher {
    shared: Arc<Shared>,
}

impl DeliveryDispatcher {
    /// Create a dispatcher whose consumers run on the current Tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn new(config: DeliveryConfig, transport: Arc<dyn Transport>) -> Self {
        Self::with_runtime(config, transport, Handle::current())
    }

    /// Create a dispatcher whose consumers run on `runtime`.
    pub fn with_runtime(config: DeliveryConfig, transport: Arc<dyn Transport>, runtime: Handle) -> Self {
        let (stop_tx, stop) = StopSignal::channel();
        let retry = RetryPolicy::new(config.max_retries);

        tracing::info!(
            transport = transport.name(),
            max_chunk_length = config.max_chunk_length,
            min_delay_ms = config.min_delay_between_sends.as_millis() as u64,
            max_retries = config.max_retries,
            "Delivery dispatcher initialized"
        );

        Self {
            shared: Arc::new(Shared {
                config,
                registry: QueueRegistry::new(),
                transport,
                retry,
                stats: DispatcherStats::default(),
                accepting: AtomicBool::new(true),
                active_consumers: AtomicUsize::new(0),
                stop_tx,
                stop,
                runtime,
            }),
        }
    }

    pub fn config(&self) -> &DeliveryConfig {
        &self.shared.config
    }

    /// Get dispatcher statistics
    pub fn stats(&self) -> DispatcherStatsSnapshot {
        self.shared.stats.snapshot()
    }

    pub fn is_accepting(&self) -> bool {
        self.shared.accepting.load(Ordering::Acquire)
    }

    /// Number of per-recipient queues currently alive
    pub fn active_queues(&self) -> usize {
        self.shared.registry.len()
    }

    /// Consumers currently running
    pub fn active_consumers(&self) -> usize {
        self.shared.active_consumers.load(Ordering::Acquire)
    }

    /// Chunks waiting for `key`
    pub fn pending_for(&self, key: impl Into<RecipientKey>) -> usize {
        self.shared.registry.pending_for(key.into())
    }

    /// Chunks waiting across all recipients
    pub fn total_pending(&self) -> usize {
        self.shared.registry.total_pending()
    }

    pub fn queue_stats(&self) -> Vec<DispatchQueueStats> {
        self.shared.registry.queue_stats()
    }

    /// No queue is registered and no consumer is running
    pub fn is_idle(&self) -> bool {
        self.shared.registry.is_empty() && self.active_consumers() == 0
    }

    /// Queue `text` for `key`, attaching `payload` to the first chunk.
    ///
    /// Returns as soon as the chunks are buffered; delivery happens later on
    /// the recipient's consumer.
    pub fn send(
        &self,
        key: impl Into<RecipientKey>,
        text: impl Into<String>,
        payload: Option<InteractivePayload>,
    ) -> Result<SendReceipt, DeliveryError> {
        let mut message = OutboundMessage::new(key, text);
        message.payload = payload;
        self.submit(message)
    }

    /// Queue a pre-built message.
    #[tracing::instrument(
        name = "dispatcher.submit",
        skip(self, message),
        fields(recipient = %message.key, message_id = %message.id)
    )]
    pub fn submit(&self, message: OutboundMessage) -> Result<SendReceipt, DeliveryError> {
        let result = self.enqueue_message(message);
        DeliveryMetrics::record_submitted("send", result.is_ok());
        result
    }

    /// Send the same text to every key independently.
    pub fn broadcast<I, K>(&self, keys: I, text: &str) -> BroadcastReceipt
    where
        I: IntoIterator<Item = K>,
        K: Into<RecipientKey>,
    {
        self.broadcast_with_payload(keys, text, None)
    }

    /// Like [`broadcast`](Self::broadcast), with a payload on each recipient's first chunk.
    ///
    /// Duplicate keys are sent to once. No ordering holds across recipients.
    #[tracing::instrument(name = "dispatcher.broadcast", skip_all)]
    pub fn broadcast_with_payload<I, K>(
        &self,
        keys: I,
        text: &str,
        payload: Option<InteractivePayload>,
    ) -> BroadcastReceipt
    where
        I: IntoIterator<Item = K>,
        K: Into<RecipientKey>,
    {
        let mut receipt = BroadcastReceipt::default();
        let mut seen = HashSet::new();

        for key in keys.into_iter().map(Into::into) {
            if !seen.insert(key) {
                continue;
            }

            let mut message = OutboundMessage::new(key, text);
            message.payload = payload.clone();

            match self.enqueue_message(message) {
                Ok(accepted) => receipt.accepted.push(accepted),
                Err(e) => receipt.rejected.push(BroadcastRejection {
                    key,
                    reason: e.to_string(),
                }),
            }
        }

        self.shared.stats.broadcasts.fetch_add(1, Ordering::Relaxed);
        DeliveryMetrics::record_submitted("broadcast", !receipt.accepted.is_empty());

        tracing::debug!(
            recipients = receipt.accepted.len(),
            rejected = receipt.rejected.len(),
            chunks = receipt.total_chunks(),
            "Broadcast queued"
        );

        receipt
    }

    /// Stop accepting messages and wait up to `timeout` for queues to finish.
    ///
    /// With [`ShutdownMode::Drain`] buffered chunks are still delivered; with
    /// [`ShutdownMode::StopAfterCurrent`] each consumer finishes its current
    /// chunk and drops the rest. If the timeout elapses, consumers are told to
    /// stop as in `StopAfterCurrent` and the result reports what was left.
    pub async fn shutdown(&self, mode: ShutdownMode, timeout: Duration) -> ShutdownResult {
        let start = Instant::now();
        self.shared.accepting.store(false, Ordering::Release);

        tracing::info!(
            ?mode,
            timeout_ms = timeout.as_millis() as u64,
            active_queues = self.active_queues(),
            pending_chunks = self.total_pending(),
            "Shutting down delivery dispatcher"
        );

        if mode == ShutdownMode::StopAfterCurrent {
            self.shared.stop_tx.send_replace(true);
        }

        let drained = tokio::time::timeout(timeout, self.wait_idle()).await.is_ok();
        let remaining_chunks = self.total_pending();

        if !drained {
            self.shared.stop_tx.send_replace(true);
            tracing::warn!(
                remaining_chunks,
                active_consumers = self.active_consumers(),
                "Delivery drain timed out, remaining chunks will be dropped"
            );
        }

        let result = ShutdownResult {
            drained,
            remaining_chunks,
            active_consumers: self.active_consumers(),
            duration: start.elapsed(),
        };

        tracing::info!(
            drained = result.drained,
            remaining_chunks = result.remaining_chunks,
            duration_ms = result.duration.as_millis() as u64,
            "Delivery dispatcher shut down"
        );

        result
    }

    /// Resolve once every queue has drained and every consumer has exited.
    pub async fn wait_idle(&self) {
        while !self.is_idle() {
            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        }
    }

    fn enqueue_message(&self, message: OutboundMessage) -> Result<SendReceipt, DeliveryError> {
        let shared = &self.shared;

        if !self.is_accepting() {
            shared.stats.messages_rejected.fetch_add(1, Ordering::Relaxed);
            return Err(DeliveryError::ShuttingDown);
        }
        if message.text.trim().is_empty() {
            shared.stats.messages_rejected.fetch_add(1, Ordering::Relaxed);
            return Err(DeliveryError::EmptyMessage);
        }

        let key = message.key;
        let message_id = message.id;
        let chunks = message.into_chunks(shared.config.max_chunk_length);
        let count = chunks.len();

        let outcome = shared.registry.enqueue(key, chunks);
        if outcome.start_consumer {
            self.spawn_consumer(outcome.queue);
        }

        shared.stats.messages_accepted.fetch_add(1, Ordering::Relaxed);
        shared.stats.chunks_enqueued.fetch_add(count as u64, Ordering::Relaxed);
        DeliveryMetrics::record_enqueued(count);

        tracing::debug!(
            recipient = %key,
            message_id = %message_id,
            chunks = count,
            "Message queued for delivery"
        );

        Ok(SendReceipt {
            message_id,
            key,
            chunks: count,
        })
    }

    fn spawn_consumer(&self, queue: Arc<DispatchQueue>) {
        let guard = ConsumerGuard::enter(self.shared.clone(), queue);
        self.shared.runtime.spawn(async move {
            guard.shared.consume(guard.queue.clone()).await;
            guard.finish();
        });
    }
}

impl Shared {
    /// Drain `queue` until it can be removed from the registry.
    async fn consume(&self, queue: Arc<DispatchQueue>) {
        let key = queue.key();
        let mut stop = self.stop.clone();
        tracing::debug!(recipient = %key, "Consumer started");

        loop {
            while let Some(chunk) = queue.pop() {
                if stop.is_raised() {
                    let dropped = DeliveryOutcome::Dropped {
                        attempts: 0,
                        reason: DropReason::Shutdown,
                    };
                    for pending in std::iter::once(chunk).chain(queue.drain_pending()) {
                        self.record_outcome(&pending, &dropped);
                    }
                    continue;
                }

                let delivery = self
                    .retry
                    .attempt_deliver(self.transport.as_ref(), &chunk, &mut stop);
                let outcome = match AssertUnwindSafe(delivery).catch_unwind().await {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        tracing::error!(
                            recipient = %key,
                            message_id = %chunk.message_id,
                            transport = self.transport.name(),
                            "Transport panicked during send"
                        );
                        DeliveryOutcome::Dropped {
                            attempts: 1,
                            reason: DropReason::TransportPanicked,
                        }
                    }
                };
                self.record_outcome(&chunk, &outcome);

                // Always cool down, even after the last chunk, so the spacing
                // holds if a new queue for this key starts right after.
                stop.sleep(self.config.min_delay_between_sends).await;
            }

            if self.registry.remove_if_empty(key, &queue) {
                break;
            }
        }

        tracing::debug!(recipient = %key, "Consumer finished");
    }

    fn record_outcome(&self, chunk: &Chunk, outcome: &DeliveryOutcome) {
        let retries = outcome.attempts().saturating_sub(1) as u64;
        self.stats.throttle_retries.fetch_add(retries, Ordering::Relaxed);

        match outcome {
            DeliveryOutcome::Delivered { attempts } => {
                self.stats.chunks_delivered.fetch_add(1, Ordering::Relaxed);
                DeliveryMetrics::record_delivered();
                tracing::debug!(
                    recipient = %chunk.key,
                    message_id = %chunk.message_id,
                    chunk = %chunk.position(),
                    attempts,
                    "Chunk delivered"
                );
            }
            DeliveryOutcome::Dropped { attempts, reason } => {
                self.stats.chunks_dropped.fetch_add(1, Ordering::Relaxed);
                DeliveryMetrics::record_dropped(reason.label());
                tracing::warn!(
                    recipient = %chunk.key,
                    message_id = %chunk.message_id,
                    chunk = %chunk.position(),
                    attempts,
                    reason = %reason,
                    "Chunk dropped"
                );
            }
        }
    }
}

/// Counts a consumer as active from spawn until its task is dropped.
///
/// If the task goes away without finishing (it panicked, or the runtime was
/// shut down or already gone at spawn) the queue is torn down and its backlog
/// recorded as dropped, so the next send for the key gets a fresh consumer.
struct ConsumerGuard {
    shared: Arc<Shared>,
    queue: Arc<DispatchQueue>,
    finished: bool,
}

impl ConsumerGuard {
    fn enter(shared: Arc<Shared>, queue: Arc<DispatchQueue>) -> Self {
        shared.active_consumers.fetch_add(1, Ordering::AcqRel);
        Self {
            shared,
            queue,
            finished: false,
        }
    }

    fn finish(mut self) {
        self.finished = true;
    }
}

impl Drop for ConsumerGuard {
    fn drop(&mut self) {
        if !self.finished {
            let key = self.queue.key();
            tracing::error!(recipient = %key, "Consumer exited before its queue drained");

            let lost = DeliveryOutcome::Dropped {
                attempts: 0,
                reason: DropReason::ConsumerLost,
            };
            for chunk in self.shared.registry.abandon(key, &self.queue) {
                self.shared.record_outcome(&chunk, &lost);
            }
        }
        self.shared.active_consumers.fetch_sub(1, Ordering::AcqRel);
    }
}
