//! paperfolio - simulated crypto trading backend
//!
//! Wires the Postgres ledger store, the CoinGecko quote source and the
//! trading engine together and serves the HTTP API.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::signal;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use paperfolio::api::{create_router, AppState};
use paperfolio::config::Config;
use paperfolio::db::Database;
use paperfolio::quotes::coingecko::spawn_price_refresher;
use paperfolio::quotes::{CoinGeckoQuotes, QuoteSource};
use paperfolio::store::LedgerStore;
use paperfolio::trading::{EngineSettings, TradingEngine};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("paperfolio - simulated trading backend v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;

    // Initialize database
    info!("Connecting to database...");
    let db = Database::new(&config.database_url).await?;
    info!("Database connected");

    let store: Arc<dyn LedgerStore> = Arc::new(db);
    let quotes = Arc::new(CoinGeckoQuotes::new(
        config.coingecko_api_url.clone(),
        config.coingecko_api_key.clone(),
        config.vs_currency.clone(),
    ));

    // Keep asset reference data warm in the background.
    let _refresher = spawn_price_refresher(
        Arc::clone(&store),
        Arc::clone(&quotes),
        config.price_refresh_interval(),
    );

    let engine = Arc::new(TradingEngine::new(
        store,
        quotes as Arc<dyn QuoteSource>,
        EngineSettings {
            starting_balance: config.starting_balance,
            quote_timeout: config.quote_timeout(),
        },
    ));
    info!("Trading engine initialized");

    // Create application state and router
    let state = Arc::new(AppState { engine });
    let app = create_router(state);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("Starting API server on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown...");
}
