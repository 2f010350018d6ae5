//! Telegram Bot API transport.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::delivery::{Chunk, InteractivePayload};

use super::{SendResult, Transport, TransportError};

const THROTTLED_STATUS: u16 = 429;

/// Settings for [`TelegramTransport`]
#[derive(Debug, Clone)]
pub struct TelegramTransportConfig {
    pub api_base: String,
    pub token: String,
    pub request_timeout: Duration,
    pub parse_mode: Option<String>,
    pub disable_web_page_preview: bool,
}

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: i64,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_markup: Option<&'a InteractivePayload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parse_mode: Option<&'a str>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    disable_web_page_preview: bool,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    error_code: Option<u16>,
    description: Option<String>,
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    retry_after: Option<i64>,
}

/// Sends chunks with `sendMessage`.
pub struct TelegramTransport {
    http: reqwest::Client,
    endpoint: String,
    parse_mode: Option<String>,
    disable_web_page_preview: bool,
}

impl TelegramTransport {
    pub fn new(config: TelegramTransportConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout.max(Duration::from_millis(1)))
            .build()
            .context("failed to create telegram api client")?;

        Ok(Self {
            http,
            endpoint: format!(
                "{}/bot{}/sendMessage",
                config.api_base.trim_end_matches('/'),
                config.token.trim()
            ),
            parse_mode: config.parse_mode.filter(|mode| !mode.trim().is_empty()),
            disable_web_page_preview: config.disable_web_page_preview,
        })
    }
}

#[async_trait]
impl Transport for TelegramTransport {
    fn name(&self) -> &'static str {
        "telegram"
    }

    async fn send(&self, chunk: &Chunk) -> SendResult {
        let request = SendMessageRequest {
            chat_id: chunk.key.id(),
            text: &chunk.text,
            reply_markup: chunk.payload.as_ref(),
            parse_mode: self.parse_mode.as_deref(),
            disable_web_page_preview: self.disable_web_page_preview,
        };

        let response = match self.http.post(&self.endpoint).json(&request).send().await {
            Ok(response) => response,
            // Strip the URL: it embeds the bot token.
            Err(e) => return SendResult::Failed(TransportError::Network(e.without_url().to_string())),
        };

        let status = response.status().as_u16();
        let retry_after_header = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        match response.text().await {
            Ok(body) => classify_response(status, retry_after_header.as_deref(), &body),
            Err(e) => SendResult::Failed(TransportError::Network(e.without_url().to_string())),
        }
    }
}

/// Map an HTTP status, `Retry-After` header and Bot API body to a [`SendResult`].
fn classify_response(status: u16, retry_after_header: Option<&str>, body: &str) -> SendResult {
    let parsed: Option<ApiResponse> = serde_json::from_str(body).ok();

    let throttled = status == THROTTLED_STATUS
        || parsed
            .as_ref()
            .and_then(|r| r.error_code)
            .is_some_and(|code| code == THROTTLED_STATUS);

    if throttled {
        let retry_after = parsed
            .as_ref()
            .and_then(|r| r.parameters.as_ref())
            .and_then(|p| p.retry_after)
            .or_else(|| retry_after_header.and_then(|h| h.trim().parse::<i64>().ok()))
            .filter(|secs| *secs > 0)
            .map(|secs| Duration::from_secs(secs as u64));
        return SendResult::Throttled { retry_after };
    }

    match parsed {
        Some(response) if response.ok && (200..300).contains(&status) => SendResult::Delivered,
        Some(response) => SendResult::Failed(TransportError::Rejected {
            status: response.error_code.unwrap_or(status),
            description: response
                .description
                .unwrap_or_else(|| "unknown error".to_string()),
        }),
        None if (200..300).contains(&status) => SendResult::Failed(TransportError::InvalidResponse(
            truncate(body, 200).to_string(),
        )),
        None => SendResult::Failed(TransportError::Rejected {
            status,
            description: truncate(body, 200).to_string(),
        }),
    }
}

fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((offset, _)) => &text[..offset],
        None => text,
    }
}
