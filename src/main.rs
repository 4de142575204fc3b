// Play-money prediction market - HTTP server entry point

use playmoney_market::{router, AppState, Config};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,playmoney_market=debug")))
        .init();

    let config = Config::from_env()?;
    info!(?config, "starting play-money prediction market");

    let state = AppState::from_config(&config)?.shared();
    let shutdown_state = state.clone();
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    info!(addr = %config.bind_addr, "server listening");
    for (method, path, what) in playmoney_market::routes::ENDPOINTS {
        info!("   {:<6} {:<22} {}", method, path, what);
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for shutdown signal");
            }
            info!("shutdown signal received");
        })
        .await?;

    // make the last writes durable before exit
    match shutdown_state.engine.flush() {
        Ok(bytes) => info!(bytes, "store flushed"),
        Err(e) => error!(error = %e, "failed to flush store"),
    }
    Ok(())
}
