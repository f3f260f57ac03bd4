//! GT7 Telemetry Server
//!
//! Bridges the console's UDP feed to WebSocket clients

use anyhow::Result;
use gt7_core::CarDatabase;
use gt7_server::{api, config::ServerConfig, state};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("Starting GT7 Telemetry Server");

    let config = ServerConfig::load()?;
    let addr = config.bind_addr()?;
    let cars = CarDatabase::load(&config.car_data_dir).unwrap_or_else(|e| {
        warn!(
            error = %e,
            dir = %config.car_data_dir,
            "car database unavailable, car_info omitted"
        );
        CarDatabase::empty()
    });
    let state = state::AppState::with_config(config).with_cars(cars);

    let app = api::create_router(state);

    info!("Server listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
