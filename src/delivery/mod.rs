//! Per-recipient ordered delivery.
//!
//! Messages are split into chunks ([`chunker`]), buffered in one
//! [`DispatchQueue`] per recipient ([`QueueRegistry`]) and drained by a single
//! consumer task per queue that spaces out sends and retries throttled ones
//! ([`RetryPolicy`]). Different recipients never wait on each other.

pub mod chunker;
mod dispatcher;
mod lifecycle;
mod queue;
mod registry;
mod retry;
mod types;

pub use dispatcher::{
    BroadcastReceipt, BroadcastRejection, DeliveryConfig, DeliveryDispatcher, DeliveryError,
    DispatcherStats, DispatcherStatsSnapshot, SendReceipt,
};
pub use lifecycle::{ShutdownMode, ShutdownResult, StopSignal};
pub use queue::{DispatchQueue, DispatchQueueStats, QueueClosed, QueueState};
pub use registry::{EnqueueOutcome, QueueRegistry};
pub use retry::{DeliveryOutcome, DropReason, RetryPolicy, RetryState};
pub use types::{Chunk, InteractivePayload, OutboundMessage, RecipientKey};
