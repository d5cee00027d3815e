use flowqr::{provider::SandboxProvider, routes::create_router, AppState, Config};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,flowqr=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting FlowQR billing bridge");

    let config = Config::load()?;

    tracing::info!(
        "Loaded configuration - Bridge: {}:{}, products: {:?}",
        config.server.host,
        config.server.port,
        config.billing.product_ids
    );

    let provider = Arc::new(SandboxProvider::from_config(&config.sandbox));
    let state = AppState::new(config.clone(), provider)?;

    state.connection.connect();

    let app = create_router(state.clone());

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Bridge listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.connection.disconnect();
    tracing::info!("Shut down");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
}
