//! MAVC Monitor - fleet registry and HTTP status API

use anyhow::{Context, Result};
use std::net::SocketAddr;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mavc_monitor::{api, Config, Registry};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("mavc_monitor=debug".parse()?))
        .init();

    tracing::info!("Starting MAVC Monitor...");

    let config = Config::from_env();
    let registry = Registry::bind(config.clone())
        .await
        .with_context(|| format!("failed to bind rendezvous port {}", config.base_port))?;

    let app = api::routes()
        .with_state(registry.clone())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = SocketAddr::from((config.bind_host, config.api_port));
    tracing::info!("API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %err, "Failed to listen for shutdown signal");
            }
        })
        .await?;

    registry.shutdown();
    Ok(())
}
