//! Per-recipient dispatch queue.
//!
//! Each queue is a FIFO buffer plus a small state machine:
//!
//! ```text
//!   Idle --push--> Draining --push--> Draining
//!                     |
//!                     +--empty, removed from registry--> Terminated
//! ```
//!
//! The state and the buffer share one mutex, so "buffer is empty" and
//! "queue is terminated" are decided together. The mutex is never held
//! across an `.await`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use super::{Chunk, RecipientKey};

/// Lifecycle of a dispatch queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueState {
    /// No consumer running
    Idle,
    /// Exactly one consumer is working through the buffer
    Draining,
    /// Removed from the registry; accepts nothing
    Terminated,
}

/// Push rejected because the queue was already torn down.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("dispatch queue for {0} is closed")]
pub struct QueueClosed(pub RecipientKey);

#[derive(Debug)]
struct Inner {
    state: QueueState,
    buffer: VecDeque<Chunk>,
}

/// Ordered buffer of pending chunks for one recipient.
#[derive(Debug)]
pub struct DispatchQueue {
    key: RecipientKey,
    inner: Mutex<Inner>,
    created_at: DateTime<Utc>,
    enqueued: AtomicU64,
    processed: AtomicU64,
}

impl DispatchQueue {
    pub fn new(key: RecipientKey) -> Self {
        Self {
            key,
            inner: Mutex::new(Inner {
                state: QueueState::Idle,
                buffer: VecDeque::new(),
            }),
            created_at: Utc::now(),
            enqueued: AtomicU64::new(0),
            processed: AtomicU64::new(0),
        }
    }

    pub fn key(&self) -> RecipientKey {
        self.key
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panic while holding the lock cannot leave the buffer half-updated.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append chunks in order.
    ///
    /// Returns `Ok(true)` when this push moved the queue from `Idle` to
    /// `Draining`; the caller must then start the single consumer.
    pub fn push<I>(&self, chunks: I) -> Result<bool, QueueClosed>
    where
        I: IntoIterator<Item = Chunk>,
    {
        let mut inner = self.lock();
        if inner.state == QueueState::Terminated {
            return Err(QueueClosed(self.key));
        }

        let before = inner.buffer.len();
        inner.buffer.extend(chunks);
        let added = inner.buffer.len() - before;
        self.enqueued.fetch_add(added as u64, Ordering::Relaxed);

        if added > 0 && inner.state == QueueState::Idle {
            inner.state = QueueState::Draining;
            return Ok(true);
        }
        Ok(false)
    }

    /// Take the next chunk, if any. Only the consumer calls this.
    pub fn pop(&self) -> Option<Chunk> {
        let chunk = self.lock().buffer.pop_front();
        if chunk.is_some() {
            self.processed.fetch_add(1, Ordering::Relaxed);
        }
        chunk
    }

    /// Discard everything still buffered, returning what was removed.
    pub fn drain_pending(&self) -> Vec<Chunk> {
        self.lock().buffer.drain(..).collect()
    }

    /// Move to `Terminated` if nothing is buffered.
    ///
    /// Called by the registry while it holds the map entry, so no producer can
    /// push in between the emptiness check and the state change.
    pub(crate) fn try_terminate(&self) -> bool {
        let mut inner = self.lock();
        if !inner.buffer.is_empty() {
            return false;
        }
        inner.state = QueueState::Terminated;
        true
    }

    /// Move to `Terminated` unconditionally, handing back whatever was buffered.
    pub(crate) fn terminate(&self) -> Vec<Chunk> {
        let mut inner = self.lock();
        inner.state = QueueState::Terminated;
        inner.buffer.drain(..).collect()
    }

    pub fn state(&self) -> QueueState {
        self.lock().state
    }

    pub fn len(&self) -> usize {
        self.lock().buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().buffer.is_empty()
    }

    pub fn stats(&self) -> DispatchQueueStats {
        let inner = self.lock();
        DispatchQueueStats {
            key: self.key,
            state: inner.state,
            pending: inner.buffer.len(),
            enqueued: self.enqueued.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            created_at: self.created_at,
        }
    }
}

/// Snapshot of a single queue
#[derive(Debug, Clone, Serialize)]
pub struct DispatchQueueStats {
    pub key: RecipientKey,
    pub state: QueueState,
    pub pending: usize,
    pub enqueued: u64,
    pub processed: u64,
    pub created_at: DateTime<Utc>,
}
