//! ijt-gateway server entry point.
//!
//! Starts the Axum HTTP server with the browser WebSocket endpoint, backed
//! by the in-process simulated joining controller.

use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use ijt_gateway::app_state::AppState;
use ijt_gateway::build_app;
use ijt_gateway::config::{GatewayConfig, LogFormat};
use ijt_gateway::protocol::simulated::{SimulatedController, SimulationPlan};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = GatewayConfig::from_env().context("invalid LISTEN_ADDR")?;

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match config.log_format {
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
    tracing::info!(
        addr = %config.listen_addr,
        sink = %config.event_sink,
        precision = %config.log_timestamp_precision,
        "starting ijt-gateway"
    );

    // Protocol backend
    let controller = Arc::new(SimulatedController::new(SimulationPlan::default()));
    let emitter = config
        .simulation_interval()
        .map(|interval| controller.spawn_auto_emitter(interval));

    // Build router
    let listen_addr = config.listen_addr;
    let app = build_app(AppState::new(config, controller));

    // Start server
    let listener = tokio::net::TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind {listen_addr}"))?;
    tracing::info!(addr = %listen_addr, "server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown requested");
        })
        .await?;

    if let Some(emitter) = emitter {
        emitter.abort();
    }
    Ok(())
}
