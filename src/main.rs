use std::net::SocketAddr;
use std::sync::Arc;

use tenant_jwks::{AppState, app, config, jwks::JwksEngine, telemetry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = config::load_config()?;
    let _otel = telemetry::init(&settings.telemetry)?;

    let shared_state = Arc::new(AppState {
        engine: Arc::new(JwksEngine::from_settings(&settings)),
    });

    let addr = SocketAddr::from(([127, 0, 0, 1], settings.port));
    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app(shared_state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
}
