use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;

use super::{parse_portfolio_id, AppState};
use crate::engine::PortfolioValuation;
use crate::error::AppError;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CombinedValuationQuery {
    /// Comma-separated portfolio ids.
    pub portfolio_ids: Option<String>,
}

pub async fn get_portfolio_valuation(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<PortfolioValuation>, AppError> {
    let portfolio_id = parse_portfolio_id(&id)?;
    Ok(Json(state.valuation.valuate_portfolio(portfolio_id).await?))
}

pub async fn get_combined_valuation(
    Query(params): Query<CombinedValuationQuery>,
    State(state): State<AppState>,
) -> Result<Json<PortfolioValuation>, AppError> {
    let ids = params
        .portfolio_ids
        .as_deref()
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(parse_portfolio_id)
        .collect::<Result<Vec<_>, _>>()?;

    if ids.is_empty() {
        return Err(AppError::BadRequest("portfolioIds is required".into()));
    }

    Ok(Json(state.valuation.valuate_portfolios(&ids).await?))
}
