mod settings;

pub use settings::{
    ApiConfig, DeliverySettings, LoggingConfig, ServerConfig, Settings, TransportConfig,
};
