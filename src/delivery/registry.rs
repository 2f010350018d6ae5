//! Concurrent recipient → dispatch queue mapping.
//!
//! Producers push while holding the key's `DashMap` entry, and the consumer
//! removes its queue with `remove_if`, which evaluates the emptiness check
//! under the same shard lock. A push therefore either lands before the removal
//! (the queue survives and its consumer keeps going) or after it (a fresh
//! queue and consumer are created).

use std::sync::Arc;

use dashmap::DashMap;

use super::queue::{DispatchQueue, DispatchQueueStats, QueueState};
use super::{Chunk, RecipientKey};

fn new_queue(key: RecipientKey) -> Arc<DispatchQueue> {
    tracing::debug!(recipient = %key, "Creating dispatch queue");
    Arc::new(DispatchQueue::new(key))
}

/// Result of [`QueueRegistry::enqueue`].
#[derive(Debug)]
pub struct EnqueueOutcome {
    pub queue: Arc<DispatchQueue>,
    /// The queue went `Idle -> Draining`; a consumer must be started for it
    pub start_consumer: bool,
}

/// Registry of live dispatch queues.
#[derive(Debug, Default)]
pub struct QueueRegistry {
    queues: DashMap<RecipientKey, Arc<DispatchQueue>>,
}

impl QueueRegistry {
    pub fn new() -> Self {
        Self {
            queues: DashMap::new(),
        }
    }

    /// Return the queue for `key`, creating it if absent.
    ///
    /// Concurrent callers for the same key all receive the same instance.
    pub fn get_or_create_queue(&self, key: RecipientKey) -> Arc<DispatchQueue> {
        self.queues.entry(key).or_insert_with(|| new_queue(key)).clone()
    }

    /// Append `chunks` to the queue for `key` in one atomic step.
    ///
    /// The push happens while the entry's shard write lock is held, so it
    /// cannot interleave with [`remove_if_empty`](Self::remove_if_empty).
    pub fn enqueue(&self, key: RecipientKey, chunks: Vec<Chunk>) -> EnqueueOutcome {
        let mut entry = self.queues.entry(key).or_insert_with(|| new_queue(key));
        if entry.state() == QueueState::Terminated {
            *entry = new_queue(key);
        }

        let start_consumer = match entry.push(chunks) {
            Ok(start) => start,
            Err(closed) => {
                tracing::error!(recipient = %key, error = %closed, "Push rejected by live queue");
                false
            }
        };

        EnqueueOutcome {
            queue: entry.value().clone(),
            start_consumer,
        }
    }

    /// Remove `queue` from the registry if it is still the registered instance
    /// for `key` and has nothing buffered, marking it `Terminated`.
    ///
    /// Returns `false` if a chunk arrived in the meantime; the caller keeps
    /// draining in that case.
    pub fn remove_if_empty(&self, key: RecipientKey, queue: &Arc<DispatchQueue>) -> bool {
        let removed = self
            .queues
            .remove_if(&key, |_, current| {
                Arc::ptr_eq(current, queue) && current.try_terminate()
            })
            .is_some();

        if removed {
            tracing::debug!(recipient = %key, "Dispatch queue drained and removed");
        }
        removed
    }

    /// Tear down `queue` whether or not it is empty, returning its backlog.
    ///
    /// Used when the queue's consumer is gone for good; the next push for
    /// `key` starts a fresh queue.
    pub fn abandon(&self, key: RecipientKey, queue: &Arc<DispatchQueue>) -> Vec<Chunk> {
        let removed = self
            .queues
            .remove_if(&key, |_, current| Arc::ptr_eq(current, queue))
            .is_some();
        let orphaned = queue.terminate();

        tracing::warn!(
            recipient = %key,
            registered = removed,
            orphaned = orphaned.len(),
            "Dispatch queue abandoned"
        );
        orphaned
    }

    pub fn get(&self, key: RecipientKey) -> Option<Arc<DispatchQueue>> {
        self.queues.get(&key).map(|q| q.value().clone())
    }

    pub fn contains(&self, key: RecipientKey) -> bool {
        self.queues.contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.queues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }

    /// Chunks buffered for `key` (0 if no queue exists)
    pub fn pending_for(&self, key: RecipientKey) -> usize {
        self.queues.get(&key).map(|q| q.len()).unwrap_or(0)
    }

    /// Chunks buffered across all queues
    pub fn total_pending(&self) -> usize {
        self.queues.iter().map(|q| q.len()).sum()
    }

    pub fn queue_stats(&self) -> Vec<DispatchQueueStats> {
        self.queues.iter().map(|q| q.stats()).collect()
    }
}
