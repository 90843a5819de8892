//! Signal Engine - market signals and risk-adjusted position sizing
//!
//! 1. Seeds per-asset history from CoinGecko (synthetic when unavailable)
//! 2. Runs the update cycle on a fixed cadence
//! 3. Serves predictions and volatilities over HTTP

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn, Level};

use market_data::{CoinGeckoClient, FallbackProvider, SyntheticMarket};
use signal_engine::{handlers, EngineConfig, EngineRunner, SignalEngine};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    info!("Starting Signal Engine...");

    let config = EngineConfig::load()?;
    info!(
        "Tracking {} assets, cycle every {}s",
        config.assets.len(),
        config.cycle.interval_secs
    );

    let synthetic = config
        .assets
        .iter()
        .fold(SyntheticMarket::new(config.data.synthetic_seed), |market, asset| {
            market.with_asset(&asset.symbol, asset.synthetic_profile())
        });
    let mut provider = FallbackProvider::new(
        Arc::new(synthetic),
        Duration::from_millis(config.cycle.fetch_timeout_ms),
    )
    .with_last_known_ttl(chrono::Duration::seconds(config.data.last_known_ttl_secs));

    if config.data.live {
        provider.add_source(Arc::new(CoinGeckoClient::new(
            config.data.coingecko_api_key.clone(),
        )));
        info!("✓ CoinGecko client initialized");
    } else {
        warn!("⚠ Live data disabled, running on synthetic data only");
    }

    let provider = Arc::new(provider);
    let engine = SignalEngine::new(config.clone())?;
    let runner = EngineRunner::new(engine, provider.clone());
    let app = handlers::router(runner.predictions(), provider);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let runner_handle = tokio::spawn(runner.run(shutdown_rx));

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.server.port)).await?;
    info!("🚀 Signal Engine listening on port {}", config.server.port);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    shutdown_tx.send(true).ok();
    runner_handle.await??;
    info!("Signal Engine stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for ctrl-c: {}", e);
    }
    info!("Shutdown signal received");
}
