use async_trait::async_trait;

use crate::delivery::Chunk;

use super::{SendResult, Transport};

/// Transport that only logs what it would have sent.
#[derive(Debug, Default)]
pub struct LogTransport;

impl LogTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for LogTransport {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn send(&self, chunk: &Chunk) -> SendResult {
        tracing::info!(
            recipient = %chunk.key,
            message_id = %chunk.message_id,
            chunk = %chunk.position(),
            chars = chunk.text.chars().count(),
            has_payload = chunk.payload.is_some(),
            text = %chunk.text,
            "Outbound chunk"
        );
        SendResult::Delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::OutboundMessage;

    #[tokio::test]
    async fn test_log_transport_always_delivers() {
        let transport = LogTransport::new();
        let chunk = OutboundMessage::new(1, "hello").into_chunks(10).remove(0);

        assert_eq!(transport.send(&chunk).await, SendResult::Delivered);
        assert_eq!(transport.name(), "log");
    }
}
