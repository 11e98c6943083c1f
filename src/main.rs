use anyhow::Context;
use coinfolio::marketdata::MarketDataClient;
use coinfolio::{
    api, config::Config, db::init_db, CoinGeckoClient, LedgerService, PriceSyncService,
    QuoteService, Repository,
};
use std::net::SocketAddr;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into()),
        )
        .init();

    let config = Config::from_env().context("loading configuration")?;
    let port = config.port;

    let pool = init_db(&config.database_path)
        .await
        .with_context(|| format!("initializing database at {}", config.database_path))?;
    let repo = Arc::new(Repository::new(pool));

    for instrument in &config.tracked_instruments {
        repo.upsert_tracked_instrument(instrument)
            .await
            .with_context(|| format!("seeding tracked instrument {}", instrument.instrument_key))?;
    }
    if !config.tracked_instruments.is_empty() {
        tracing::info!(
            count = config.tracked_instruments.len(),
            "tracked instruments seeded"
        );
    }

    let client: Arc<dyn MarketDataClient> = Arc::new(
        CoinGeckoClient::new(config.market_data_api_url.clone(), config.market_data_timeout)
            .context("building market data client")?
            .with_api_key(config.market_data_api_key.clone())
            .with_retry_budget(config.market_data_retry_budget),
    );

    let ledger = Arc::new(LedgerService::new(repo.clone(), config.oversell_policy));
    let quotes = Arc::new(QuoteService::new(
        client.clone(),
        repo.clone(),
        config.quote_cache_ttl,
        config.quote_cache_max_entries,
    ));
    let sync = Arc::new(PriceSyncService::new(
        client,
        repo.clone(),
        config.price_sync_interval,
    ));

    if config.price_sync_enabled {
        sync.start().await;
    } else {
        tracing::info!("price sync disabled");
    }

    let app = api::create_router(api::AppState::new(repo, ledger, quotes, sync.clone()));

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding to {}", addr))?;

    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    sync.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
