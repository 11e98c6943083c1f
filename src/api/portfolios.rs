use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use super::{json_body, parse_portfolio_id, AppState};
use crate::domain::Portfolio;
use crate::error::AppError;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePortfolioRequest {
    pub owner: String,
    pub name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfoliosQuery {
    pub owner: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfoliosResponse {
    pub portfolios: Vec<Portfolio>,
}

pub async fn create_portfolio(
    State(state): State<AppState>,
    payload: Result<Json<CreatePortfolioRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Portfolio>), AppError> {
    let request = json_body(payload)?;
    let portfolio = state
        .ledger
        .create_portfolio(&request.owner, &request.name)
        .await?;
    Ok((StatusCode::CREATED, Json(portfolio)))
}

pub async fn list_portfolios(
    Query(params): Query<PortfoliosQuery>,
    State(state): State<AppState>,
) -> Result<Json<PortfoliosResponse>, AppError> {
    let owner = params
        .owner
        .ok_or_else(|| AppError::BadRequest("owner is required".into()))?;
    let portfolios = state.ledger.portfolios_for_owner(&owner).await?;
    Ok(Json(PortfoliosResponse { portfolios }))
}

pub async fn get_portfolio(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<Portfolio>, AppError> {
    let id = parse_portfolio_id(&id)?;
    Ok(Json(state.ledger.portfolio(id).await?))
}

pub async fn delete_portfolio(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<StatusCode, AppError> {
    let id = parse_portfolio_id(&id)?;
    state.ledger.delete_portfolio(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
