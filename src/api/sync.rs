use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{json_body, AppState};
use crate::domain::{InstrumentKey, PriceQuote, Symbol, TrackedInstrument};
use crate::error::AppError;
use crate::sync::{PassOutcome, SyncStatus};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToggleResponse {
    /// Whether the call changed the loop state.
    pub changed: bool,
    pub status: SyncStatus,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackInstrumentRequest {
    pub instrument_key: String,
    pub symbol: String,
    pub name: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstrumentsResponse {
    pub instruments: Vec<TrackedInstrument>,
}

pub async fn get_status(State(state): State<AppState>) -> Json<SyncStatus> {
    Json(state.sync.status().await)
}

pub async fn start(State(state): State<AppState>) -> Json<ToggleResponse> {
    let changed = state.sync.start().await;
    Json(ToggleResponse {
        changed,
        status: state.sync.status().await,
    })
}

pub async fn stop(State(state): State<AppState>) -> Json<ToggleResponse> {
    let changed = state.sync.stop().await;
    Json(ToggleResponse {
        changed,
        status: state.sync.status().await,
    })
}

/// Run one pass immediately, outside the schedule.
pub async fn run_now(State(state): State<AppState>) -> Result<Json<PassOutcome>, AppError> {
    Ok(Json(state.sync.run_pass().await?))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredPricesResponse {
    pub prices: Vec<PriceQuote>,
}

/// Everything the sync loop has written so far.
pub async fn get_stored_prices(
    State(state): State<AppState>,
) -> Result<Json<StoredPricesResponse>, AppError> {
    let prices = state.repo.price_quotes().await?;
    Ok(Json(StoredPricesResponse { prices }))
}

pub async fn list_instruments(
    State(state): State<AppState>,
) -> Result<Json<InstrumentsResponse>, AppError> {
    let instruments = state.repo.active_instruments().await?;
    Ok(Json(InstrumentsResponse { instruments }))
}

/// Add an instrument to the sync universe, or reactivate it.
pub async fn track_instrument(
    State(state): State<AppState>,
    payload: Result<Json<TrackInstrumentRequest>, JsonRejection>,
) -> Result<Json<TrackedInstrument>, AppError> {
    let request = json_body(payload)?;
    let instrument_key = InstrumentKey::parse(&request.instrument_key)
        .map_err(|e| AppError::BadRequest(e.to_string()))?;
    let symbol = Symbol::parse(&request.symbol).map_err(|e| AppError::BadRequest(e.to_string()))?;
    let name = request
        .name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| symbol.as_str().to_string());

    let instrument = TrackedInstrument {
        instrument_key,
        symbol,
        name,
        active: true,
    };
    state.repo.upsert_tracked_instrument(&instrument).await?;
    info!(instrument = %instrument.instrument_key, symbol = %instrument.symbol, "instrument tracked");
    Ok(Json(instrument))
}

pub async fn untrack_instrument(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    let key = InstrumentKey::parse(&id).map_err(|e| AppError::BadRequest(e.to_string()))?;
    if !state.repo.set_instrument_active(&key, false).await? {
        return Err(AppError::NotFound(format!("Instrument {} is not tracked", key)));
    }
    info!(instrument = %key, "instrument untracked");
    Ok(Json(serde_json::json!({"instrumentKey": key, "active": false})))
}
