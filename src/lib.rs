// Core delivery engine
pub mod delivery;
pub mod transport;

// Shared infrastructure
pub mod config;
pub mod error;
pub mod metrics;

// Application layer
pub mod api;
pub mod server;

// Supporting modules
pub mod shutdown;
pub mod telemetry;
