use std::sync::Arc;
use std::time::Duration;

use crate::config::TransportConfig;

use super::{LogTransport, TelegramTransport, TelegramTransportConfig, Transport};

/// Create the transport selected by `transport.backend`.
///
/// - `"telegram"`: Bot API transport; requires `transport.token`
/// - `"log"` (default): logs chunks instead of sending them
///
/// Selecting Telegram without a token falls back to the log transport.
pub fn create_transport(settings: &TransportConfig) -> anyhow::Result<Arc<dyn Transport>> {
    match settings.backend.as_str() {
        "telegram" => {
            let Some(token) = settings.token.clone().filter(|t| !t.trim().is_empty()) else {
                tracing::warn!(
                    "Telegram transport requested but no token configured, falling back to log"
                );
                return Ok(Arc::new(LogTransport::new()));
            };

            tracing::info!(
                backend = "telegram",
                api_base = %settings.api_base,
                timeout_ms = settings.request_timeout_ms,
                "Creating Telegram transport"
            );
            let transport = TelegramTransport::new(TelegramTransportConfig {
                api_base: settings.api_base.clone(),
                token,
                request_timeout: Duration::from_millis(settings.request_timeout_ms),
                parse_mode: settings.parse_mode.clone(),
                disable_web_page_preview: settings.disable_web_page_preview,
            })?;
            Ok(Arc::new(transport))
        }
        other => {
            if other != "log" {
                tracing::warn!(backend = %other, "Unknown transport backend, using log");
            }
            tracing::info!(backend = "log", "Creating log transport");
            Ok(Arc::new(LogTransport::new()))
        }
    }
}
