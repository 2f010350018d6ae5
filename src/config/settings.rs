use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub delivery: DeliverySettings,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiConfig {
    pub key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeliverySettings {
    /// Longest chunk handed to the transport, in characters
    #[serde(default = "default_max_chunk_length")]
    pub max_chunk_length: usize,
    /// Minimum spacing between two sends to the same recipient
    #[serde(default = "default_min_delay_between_sends_ms")]
    pub min_delay_between_sends_ms: u64,
    /// Retries allowed for a throttled chunk before it is dropped
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Upper bound on how long shutdown waits for queues to drain
    #[serde(default = "default_shutdown_timeout_seconds")]
    pub shutdown_timeout_seconds: u64,
}

fn default_max_chunk_length() -> usize {
    4096 // Telegram sendMessage limit
}

fn default_min_delay_between_sends_ms() -> u64 {
    1000
}

fn default_max_retries() -> u32 {
    3
}

fn default_shutdown_timeout_seconds() -> u64 {
    10
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransportConfig {
    /// "telegram" or "log"
    #[serde(default = "default_transport_backend")]
    pub backend: String,
    pub token: Option<String>,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    pub parse_mode: Option<String>,
    #[serde(default)]
    pub disable_web_page_preview: bool,
}

fn default_transport_backend() -> String {
    "log".to_string()
}

fn default_api_base() -> String {
    "https://api.telegram.org".to_string()
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// "pretty" or "json"
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8090
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            .set_default("server.host", default_host())?
            .set_default("server.port", default_port() as i64)?
            .set_default("delivery.max_chunk_length", default_max_chunk_length() as i64)?
            .set_default(
                "delivery.min_delay_between_sends_ms",
                default_min_delay_between_sends_ms() as i64,
            )?
            .set_default("delivery.max_retries", default_max_retries() as i64)?
            .set_default(
                "delivery.shutdown_timeout_seconds",
                default_shutdown_timeout_seconds() as i64,
            )?
            .set_default("transport.backend", default_transport_backend())?
            .set_default("logging.format", default_log_format())?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // SERVER__PORT, DELIVERY__MAX_RETRIES, TRANSPORT__TOKEN, ...
            .add_source(Environment::default().separator("__").try_parsing(true));

        builder.build()?.try_deserialize()
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            max_chunk_length: default_max_chunk_length(),
            min_delay_between_sends_ms: default_min_delay_between_sends_ms(),
            max_retries: default_max_retries(),
            shutdown_timeout_seconds: default_shutdown_timeout_seconds(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            backend: default_transport_backend(),
            token: None,
            api_base: default_api_base(),
            request_timeout_ms: default_request_timeout_ms(),
            parse_mode: None,
            disable_web_page_preview: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: default_log_format(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let server = ServerConfig::default();
        assert_eq!(server.host, "0.0.0.0");
        assert_eq!(server.port, 8090);

        let delivery = DeliverySettings::default();
        assert_eq!(delivery.max_chunk_length, 4096);
        assert_eq!(delivery.min_delay_between_sends_ms, 1000);
        assert_eq!(delivery.max_retries, 3);

        let transport = TransportConfig::default();
        assert_eq!(transport.backend, "log");
        assert!(transport.token.is_none());
    }

    #[test]
    fn test_deserialize_partial_sections() {
        let settings: Settings = Config::builder()
            .set_override("delivery.max_retries", 5)
            .unwrap()
            .set_override("transport.backend", "telegram")
            .unwrap()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(settings.delivery.max_retries, 5);
        assert_eq!(settings.delivery.max_chunk_length, 4096);
        assert_eq!(settings.transport.backend, "telegram");
        assert_eq!(settings.transport.api_base, "https://api.telegram.org");
        assert_eq!(settings.server_addr(), "0.0.0.0:8090");
    }
}
