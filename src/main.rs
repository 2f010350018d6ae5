use anyhow::Result;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

use chat_delivery_service::config::Settings;
use chat_delivery_service::delivery::{DeliveryConfig, DeliveryDispatcher};
use chat_delivery_service::server::{create_app, AppState};
use chat_delivery_service::shutdown::{wait_for_signal, GracefulShutdown, ShutdownConfig};
use chat_delivery_service::telemetry::init_tracing;
use chat_delivery_service::transport::create_transport;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let settings = Settings::new()?;

    // Initialize tracing
    init_tracing(&settings.logging)?;
    tracing::info!("Configuration loaded");

    // Build the delivery pipeline
    let transport = create_transport(&settings.transport)?;
    let dispatcher = DeliveryDispatcher::new(DeliveryConfig::from(&settings.delivery), transport);
    let shutdown = GracefulShutdown::with_config(
        dispatcher.clone(),
        ShutdownConfig::from(&settings.delivery),
    );

    // Create Axum app
    let addr = settings.server_addr();
    let app = create_app(AppState::new(settings, dispatcher));

    // Start server
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    let (reason_tx, reason_rx) = oneshot::channel();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let reason = wait_for_signal().await;
            tracing::info!(signal = reason, "Received shutdown signal, stopping HTTP server");
            let _ = reason_tx.send(reason);
        })
        .await?;

    // HTTP is closed; let the dispatcher finish what it holds
    let reason = reason_rx.await.unwrap_or("server_stopped");
    shutdown.execute(reason).await;

    tracing::info!("Server shutdown complete");
    Ok(())
}
