use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use super::{json_body, parse_portfolio_id, AppState};
use crate::domain::{Decimal, NewTrade, TimeMs, Transaction};
use crate::error::AppError;
use crate::ledger::TradeReceipt;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeRequest {
    pub kind: String,
    pub symbol: String,
    pub name: Option<String>,
    pub quantity: Option<Decimal>,
    pub unit_price: Option<Decimal>,
    pub fee: Option<Decimal>,
    /// Milliseconds since epoch; defaults to now.
    pub timestamp: Option<i64>,
    pub note: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionsQuery {
    pub symbol: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionsResponse {
    pub transactions: Vec<Transaction>,
}

pub async fn post_trade(
    Path(id): Path<String>,
    State(state): State<AppState>,
    payload: Result<Json<TradeRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<TradeReceipt>), AppError> {
    let portfolio_id = parse_portfolio_id(&id)?;
    let request = json_body(payload)?;

    let quantity = request
        .quantity
        .ok_or_else(|| AppError::BadRequest("quantity is required".into()))?;
    let unit_price = request
        .unit_price
        .ok_or_else(|| AppError::BadRequest("unitPrice is required".into()))?;

    let receipt = state
        .ledger
        .record_trade(NewTrade {
            portfolio_id: Some(portfolio_id),
            kind: request.kind,
            symbol: request.symbol,
            name: request.name,
            quantity,
            unit_price,
            fee: request.fee,
            timestamp: request.timestamp.map(TimeMs::new),
            note: request.note,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(receipt)))
}

pub async fn get_transactions(
    Path(id): Path<String>,
    Query(params): Query<TransactionsQuery>,
    State(state): State<AppState>,
) -> Result<Json<TransactionsResponse>, AppError> {
    let portfolio_id = parse_portfolio_id(&id)?;
    let symbol = match params.symbol.as_deref() {
        Some("") | None => None,
        Some(s) => Some(s),
    };
    let transactions = state.ledger.transactions(portfolio_id, symbol).await?;
    Ok(Json(TransactionsResponse { transactions }))
}
