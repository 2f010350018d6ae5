use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier partitioning independent delivery streams (a chat id).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecipientKey(i64);

impl RecipientKey {
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    pub const fn id(self) -> i64 {
        self.0
    }
}

impl From<i64> for RecipientKey {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl fmt::Display for RecipientKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One-time interactive payload attached to a message (e.g. a keyboard).
///
/// The value is passed through to the transport untouched; for Telegram it is
/// serialized as the `reply_markup` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InteractivePayload(serde_json::Value);

impl InteractivePayload {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    /// Build an inline keyboard from rows of `(label, callback_data)` pairs.
    pub fn inline_keyboard<L, D>(rows: Vec<Vec<(L, D)>>) -> Self
    where
        L: Into<String>,
        D: Into<String>,
    {
        let rows: Vec<Vec<serde_json::Value>> = rows
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .map(|(label, data)| {
                        serde_json::json!({
                            "text": label.into(),
                            "callback_data": data.into(),
                        })
                    })
                    .collect()
            })
            .collect();

        Self(serde_json::json!({ "inline_keyboard": rows }))
    }

    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }
}

/// A logical message as submitted by a producer.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    /// Unique identifier for this message
    pub id: Uuid,
    /// Destination chat
    pub key: RecipientKey,
    /// Full, unsplit text
    pub text: String,
    /// Optional keyboard, delivered with the first chunk only
    pub payload: Option<InteractivePayload>,
    /// When the producer emitted the message
    pub emitted_at: DateTime<Utc>,
}

impl OutboundMessage {
    pub fn new(key: impl Into<RecipientKey>, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            key: key.into(),
            text: text.into(),
            payload: None,
            emitted_at: Utc::now(),
        }
    }

    pub fn with_payload(mut self, payload: InteractivePayload) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Split into ordered chunks of at most `limit` characters.
    ///
    /// The payload ends up on the chunk with index 0 and nowhere else.
    pub fn into_chunks(self, limit: usize) -> Vec<Chunk> {
        let parts = super::chunker::split(&self.text, limit);
        let count = parts.len();
        let mut payload = self.payload;

        parts
            .into_iter()
            .enumerate()
            .map(|(index, text)| Chunk {
                message_id: self.id,
                key: self.key,
                index,
                count,
                text,
                payload: payload.take(),
                emitted_at: self.emitted_at,
            })
            .collect()
    }
}

/// Bounded-length fragment of an [`OutboundMessage`]; the unit of physical delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub message_id: Uuid,
    pub key: RecipientKey,
    /// Position within the parent message, starting at 0
    pub index: usize,
    /// Number of chunks the parent message was split into
    pub count: usize,
    pub text: String,
    pub payload: Option<InteractivePayload>,
    pub emitted_at: DateTime<Utc>,
}

impl Chunk {
    pub fn is_first(&self) -> bool {
        self.index == 0
    }

    /// Human-readable position, e.g. `2/3`.
    pub fn position(&self) -> String {
        format!("{}/{}", self.index + 1, self.count)
    }
}
