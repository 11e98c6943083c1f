use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;

use super::{parse_portfolio_id, AppState};
use crate::domain::Position;
use crate::error::AppError;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionsResponse {
    pub positions: Vec<Position>,
}

pub async fn get_positions(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<PositionsResponse>, AppError> {
    let portfolio_id = parse_portfolio_id(&id)?;
    let positions = state.ledger.positions(portfolio_id).await?;
    Ok(Json(PositionsResponse { positions }))
}

pub async fn get_position(
    Path((id, symbol)): Path<(String, String)>,
    State(state): State<AppState>,
) -> Result<Json<Position>, AppError> {
    let portfolio_id = parse_portfolio_id(&id)?;
    state
        .ledger
        .position(portfolio_id, &symbol)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("No open position in {}", symbol)))
}

/// Replace stored positions with a replay of the ledger.
pub async fn rebuild_positions(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<PositionsResponse>, AppError> {
    let portfolio_id = parse_portfolio_id(&id)?;
    let mut positions = state.ledger.rebuild_positions(portfolio_id).await?;
    positions.sort_by(|a, b| a.symbol.cmp(&b.symbol));
    Ok(Json(PositionsResponse { positions }))
}
