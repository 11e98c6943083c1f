use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::domain::{InstrumentKey, Symbol};
use crate::error::AppError;
use crate::marketdata::{
    InstrumentDetail, PriceBatch, PriceHistory, SearchHit, SymbolQuote, TrendingInstrument,
};

const MAX_HISTORY_DAYS: u32 = 365;
const DEFAULT_HISTORY_DAYS: u32 = 7;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PricesQuery {
    /// Comma-separated instrument keys.
    pub ids: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchQuery {
    pub q: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryQuery {
    pub days: Option<u32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PricesResponse {
    pub prices: PriceBatch,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    pub results: Vec<SearchHit>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendingResponse {
    pub trending: Vec<TrendingInstrument>,
}

pub async fn get_prices(
    Query(params): Query<PricesQuery>,
    State(state): State<AppState>,
) -> Result<Json<PricesResponse>, AppError> {
    let ids = params
        .ids
        .as_deref()
        .unwrap_or_default()
        .split(',')
        .filter(|s| !s.trim().is_empty())
        .map(parse_instrument_key)
        .collect::<Result<Vec<_>, _>>()?;

    if ids.is_empty() {
        return Err(AppError::BadRequest("ids is required".into()));
    }

    let prices = state.quotes.prices(&ids).await?;
    Ok(Json(PricesResponse { prices }))
}

pub async fn get_symbol_quote(
    Path(symbol): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<SymbolQuote>, AppError> {
    let symbol = Symbol::parse(&symbol).map_err(|e| AppError::BadRequest(e.to_string()))?;
    Ok(Json(state.quotes.quote_for_symbol(&symbol).await?))
}

pub async fn get_detail(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<InstrumentDetail>, AppError> {
    let id = parse_instrument_key(&id)?;
    Ok(Json(state.quotes.detail(&id).await?))
}

pub async fn search(
    Query(params): Query<SearchQuery>,
    State(state): State<AppState>,
) -> Result<Json<SearchResponse>, AppError> {
    let results = state
        .quotes
        .search(params.q.as_deref().unwrap_or_default())
        .await?;
    Ok(Json(SearchResponse { results }))
}

pub async fn get_trending(
    State(state): State<AppState>,
) -> Result<Json<TrendingResponse>, AppError> {
    let trending = state.quotes.trending().await?;
    Ok(Json(TrendingResponse { trending }))
}

pub async fn get_history(
    Path(id): Path<String>,
    Query(params): Query<HistoryQuery>,
    State(state): State<AppState>,
) -> Result<Json<PriceHistory>, AppError> {
    let id = parse_instrument_key(&id)?;
    let days = params.days.unwrap_or(DEFAULT_HISTORY_DAYS);
    if !(1..=MAX_HISTORY_DAYS).contains(&days) {
        return Err(AppError::BadRequest(format!(
            "days must be between 1 and {}",
            MAX_HISTORY_DAYS
        )));
    }
    Ok(Json(state.quotes.history(&id, days).await?))
}

fn parse_instrument_key(raw: &str) -> Result<InstrumentKey, AppError> {
    InstrumentKey::parse(raw).map_err(|e| AppError::BadRequest(e.to_string()))
}
