pub mod health;
pub mod market;
pub mod portfolios;
pub mod positions;
pub mod sync;
pub mod trades;
pub mod valuation;

use crate::db::Repository;
use crate::domain::PortfolioId;
use crate::error::AppError;
use crate::ledger::{LedgerService, ValuationService};
use crate::marketdata::QuoteService;
use crate::sync::PriceSyncService;
use axum::extract::rejection::JsonRejection;
use axum::{
    routing::{delete, get, post},
    Json, Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<Repository>,
    pub ledger: Arc<LedgerService>,
    pub valuation: Arc<ValuationService>,
    pub quotes: Arc<QuoteService>,
    pub sync: Arc<PriceSyncService>,
}

impl AppState {
    pub fn new(
        repo: Arc<Repository>,
        ledger: Arc<LedgerService>,
        quotes: Arc<QuoteService>,
        sync: Arc<PriceSyncService>,
    ) -> Self {
        let valuation = Arc::new(ValuationService::new(Arc::clone(&repo)));
        Self {
            repo,
            ledger,
            valuation,
            quotes,
            sync,
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health::health))
        .route("/ready", get(health::ready))
        .route(
            "/v1/portfolios",
            get(portfolios::list_portfolios).post(portfolios::create_portfolio),
        )
        .route(
            "/v1/portfolios/:id",
            get(portfolios::get_portfolio).delete(portfolios::delete_portfolio),
        )
        .route("/v1/portfolios/:id/trades", post(trades::post_trade))
        .route(
            "/v1/portfolios/:id/transactions",
            get(trades::get_transactions),
        )
        .route("/v1/portfolios/:id/positions", get(positions::get_positions))
        .route(
            "/v1/portfolios/:id/positions/rebuild",
            post(positions::rebuild_positions),
        )
        .route(
            "/v1/portfolios/:id/positions/:symbol",
            get(positions::get_position),
        )
        .route(
            "/v1/portfolios/:id/valuation",
            get(valuation::get_portfolio_valuation),
        )
        .route("/v1/valuation", get(valuation::get_combined_valuation))
        .route("/v1/market/prices", get(market::get_prices))
        .route("/v1/market/symbols/:symbol", get(market::get_symbol_quote))
        .route("/v1/market/coins/:id", get(market::get_detail))
        .route("/v1/market/coins/:id/history", get(market::get_history))
        .route("/v1/market/search", get(market::search))
        .route("/v1/market/trending", get(market::get_trending))
        .route("/v1/sync/status", get(sync::get_status))
        .route("/v1/sync/start", post(sync::start))
        .route("/v1/sync/stop", post(sync::stop))
        .route("/v1/sync/run", post(sync::run_now))
        .route("/v1/sync/prices", get(sync::get_stored_prices))
        .route(
            "/v1/sync/instruments",
            get(sync::list_instruments).post(sync::track_instrument),
        )
        .route(
            "/v1/sync/instruments/:id",
            delete(sync::untrack_instrument),
        )
        .layer(cors)
        .with_state(state)
}

pub(crate) fn parse_portfolio_id(raw: &str) -> Result<PortfolioId, AppError> {
    raw.parse::<PortfolioId>()
        .map_err(|_| AppError::BadRequest(format!("Invalid portfolio id: {}", raw)))
}

/// Unwrap a JSON body, turning extractor rejections into 400s with a JSON error.
pub(crate) fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| AppError::BadRequest(rejection.body_text()))
}
