//! Messaging platform transports.
//!
//! A transport performs one physical send of a [`Chunk`] and reports the
//! outcome as a typed [`SendResult`]. Throttling is distinguished from other
//! failures so the retry policy can honor the platform's advertised wait.
//!
//! - `TelegramTransport`: Telegram Bot API `sendMessage` over HTTPS
//! - `LogTransport`: logs every chunk and reports success (development mode)
//!
//! Use `create_transport()` to build the transport selected in configuration.

mod factory;
mod log;
mod telegram;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::delivery::Chunk;

pub use factory::create_transport;
pub use log::LogTransport;
pub use telegram::{TelegramTransport, TelegramTransportConfig};

/// Non-throttling failure reported by a transport.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TransportError {
    /// Request could not be sent or no response arrived
    #[error("Network error: {0}")]
    Network(String),

    /// Platform rejected the message (bad chat id, malformed markup, ...)
    #[error("Rejected with status {status}: {description}")]
    Rejected { status: u16, description: String },

    /// Response body could not be understood
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Result of a single physical send.
#[derive(Debug, Clone, PartialEq)]
pub enum SendResult {
    Delivered,
    /// Rate limited; `retry_after` is the platform-mandated wait, if it gave one
    Throttled { retry_after: Option<Duration> },
    Failed(TransportError),
}

impl SendResult {
    pub fn throttled(retry_after: Duration) -> Self {
        Self::Throttled {
            retry_after: Some(retry_after),
        }
    }
}

/// Outbound side of the messaging platform.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Short identifier used in logs and metrics
    fn name(&self) -> &'static str;

    /// Attempt to deliver one chunk
    async fn send(&self, chunk: &Chunk) -> SendResult;
}
