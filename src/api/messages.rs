//! Message submission endpoints.

use axum::{extract::State, http::StatusCode, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::delivery::{BroadcastRejection, InteractivePayload, SendReceipt};
use crate::error::{AppError, Result};
use crate::server::AppState;

/// Upper bound on recipients in one broadcast request
pub const MAX_BROADCAST_RECIPIENTS: usize = 10_000;

/// Request to send a message to one chat
#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    /// Target chat ID
    pub chat_id: i64,
    /// Message text; split into chunks if it exceeds the platform limit
    pub text: String,
    /// Optional interactive payload attached to the first chunk
    #[serde(default)]
    pub reply_markup: Option<InteractivePayload>,
}

/// Request to send the same message to many chats
#[derive(Debug, Deserialize)]
pub struct BroadcastMessageRequest {
    /// Target chat IDs
    pub chat_ids: Vec<i64>,
    pub text: String,
    #[serde(default)]
    pub reply_markup: Option<InteractivePayload>,
}

/// A message accepted for delivery
#[derive(Debug, Serialize, Deserialize)]
pub struct SendMessageResponse {
    pub message_id: Uuid,
    pub chat_id: i64,
    /// Number of chunks queued
    pub chunks: usize,
    pub accepted_at: DateTime<Utc>,
}

impl SendMessageResponse {
    fn from_receipt(receipt: &SendReceipt, accepted_at: DateTime<Utc>) -> Self {
        Self {
            message_id: receipt.message_id,
            chat_id: receipt.key.id(),
            chunks: receipt.chunks,
            accepted_at,
        }
    }
}

/// Response for a broadcast request
#[derive(Debug, Serialize)]
pub struct BroadcastMessageResponse {
    pub accepted: Vec<SendMessageResponse>,
    pub rejected: Vec<BroadcastRejection>,
    pub total_chunks: usize,
    pub accepted_at: DateTime<Utc>,
}

/// POST /api/v1/messages/send
pub async fn send_message(
    State(state): State<AppState>,
    Json(request): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<SendMessageResponse>)> {
    let receipt = state
        .dispatcher
        .send(request.chat_id, request.text, request.reply_markup)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SendMessageResponse::from_receipt(&receipt, Utc::now())),
    ))
}

/// POST /api/v1/messages/broadcast
pub async fn broadcast_message(
    State(state): State<AppState>,
    Json(request): Json<BroadcastMessageRequest>,
) -> Result<(StatusCode, Json<BroadcastMessageResponse>)> {
    if request.chat_ids.is_empty() {
        return Err(AppError::Validation("chat_ids must not be empty".to_string()));
    }
    if request.chat_ids.len() > MAX_BROADCAST_RECIPIENTS {
        return Err(AppError::Validation(format!(
            "at most {} chat_ids per broadcast",
            MAX_BROADCAST_RECIPIENTS
        )));
    }
    if request.text.trim().is_empty() {
        return Err(AppError::Validation("text must not be empty".to_string()));
    }
    if !state.dispatcher.is_accepting() {
        return Err(AppError::Unavailable("dispatcher is shutting down".to_string()));
    }

    let receipt = state.dispatcher.broadcast_with_payload(
        request.chat_ids,
        &request.text,
        request.reply_markup,
    );

    let accepted_at = Utc::now();
    let total_chunks = receipt.total_chunks();
    Ok((
        StatusCode::ACCEPTED,
        Json(BroadcastMessageResponse {
            accepted: receipt
                .accepted
                .iter()
                .map(|r| SendMessageResponse::from_receipt(r, accepted_at))
                .collect(),
            rejected: receipt.rejected,
            total_chunks,
            accepted_at,
        }),
    ))
}
